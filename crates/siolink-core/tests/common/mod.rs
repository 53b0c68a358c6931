#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex};

use siolink_core::{DriverBus, RelayConnector, RelaySocket, SioDriver};

/// A lifecycle or register event seen by a [`RecordingDriver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    Init(&'static str),
    Deinit(&'static str),
    Load(&'static str),
    Unload(&'static str),
    Write(&'static str, u32, u16),
}

pub type EventLog = Arc<Mutex<Vec<DriverEvent>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn drain(log: &EventLog) -> Vec<DriverEvent> {
    std::mem::take(&mut *log.lock().unwrap())
}

/// A driver that records every hook call into a shared log.
pub struct RecordingDriver {
    pub name: &'static str,
    pub log: EventLog,
    pub init_ok: bool,
    /// When set, register writes are claimed and OR-ed with this value.
    pub claim_writes: Option<u16>,
}

impl RecordingDriver {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            init_ok: true,
            claim_writes: None,
        }
    }

    pub fn failing(name: &'static str, log: &EventLog) -> Self {
        Self {
            init_ok: false,
            ..Self::new(name, log)
        }
    }

    pub fn claiming(name: &'static str, log: &EventLog, or_mask: u16) -> Self {
        Self {
            claim_writes: Some(or_mask),
            ..Self::new(name, log)
        }
    }

    fn push(&self, event: DriverEvent) {
        self.log.lock().unwrap().push(event);
    }
}

impl SioDriver for RecordingDriver {
    fn init(&mut self) -> bool {
        self.push(DriverEvent::Init(self.name));
        self.init_ok
    }

    fn deinit(&mut self) {
        self.push(DriverEvent::Deinit(self.name));
    }

    fn load(&mut self) {
        self.push(DriverEvent::Load(self.name));
    }

    fn unload(&mut self) {
        self.push(DriverEvent::Unload(self.name));
    }

    fn write_register(&mut self, _bus: &mut DriverBus<'_>, address: u32, value: u16) -> Option<u16> {
        self.push(DriverEvent::Write(self.name, address, value));
        self.claim_writes.map(|mask| value | mask)
    }
}

/// Everything a [`MockConnector`] and its sockets did.
#[derive(Debug, Default)]
pub struct Wire {
    pub connects: Vec<SocketAddrV4>,
    pub sent: Vec<u8>,
    pub inbound: VecDeque<u8>,
    pub shutdowns: usize,
    pub refuse: bool,
    /// Number of `poll_connected` calls that report "still connecting".
    pub pending_polls: usize,
    pub fail_send: bool,
}

pub type SharedWire = Arc<Mutex<Wire>>;

pub fn wire() -> SharedWire {
    Arc::new(Mutex::new(Wire::default()))
}

pub struct MockConnector {
    pub wire: SharedWire,
}

impl MockConnector {
    pub fn boxed(wire: &SharedWire) -> Box<dyn RelayConnector> {
        Box::new(Self {
            wire: Arc::clone(wire),
        })
    }
}

impl RelayConnector for MockConnector {
    fn connect(&mut self, target: SocketAddrV4) -> io::Result<Box<dyn RelaySocket>> {
        let mut wire = self.wire.lock().unwrap();
        wire.connects.push(target);
        if wire.refuse {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        Ok(Box::new(MockSocket {
            wire: Arc::clone(&self.wire),
        }))
    }
}

pub struct MockSocket {
    wire: SharedWire,
}

impl RelaySocket for MockSocket {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut wire = self.wire.lock().unwrap();
        if wire.fail_send {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        wire.sent.extend_from_slice(bytes);
        Ok(())
    }

    fn recv_byte(&mut self) -> io::Result<u8> {
        self.wire
            .lock()
            .unwrap()
            .inbound
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed"))
    }

    fn poll_connected(&mut self) -> io::Result<bool> {
        let mut wire = self.wire.lock().unwrap();
        if wire.pending_polls > 0 {
            wire.pending_polls -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.wire.lock().unwrap().shutdowns += 1;
        Ok(())
    }
}

/// Writes each byte of `bytes` to the data register.
pub fn write_all(relay: &mut siolink_core::RelayEngine, bytes: &[u8]) {
    for &byte in bytes {
        relay.write(byte as u16);
    }
}
