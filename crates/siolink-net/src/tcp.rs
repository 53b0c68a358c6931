use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4, TcpStream};
use std::time::Instant;

use log::{debug, info};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use siolink_core::{RelayConnector, RelaySocket};

use crate::{NetError, TcpRelayOptions, connect_in_progress};

const LOG_TARGET: &str = "siolink.net";

/// Opens relay connections over TCP/IPv4.
#[derive(Debug, Default)]
pub struct TcpRelayConnector {
    options: TcpRelayOptions,
}

impl TcpRelayConnector {
    pub fn new(options: TcpRelayOptions) -> Result<Self, NetError> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &TcpRelayOptions {
        &self.options
    }
}

impl RelayConnector for TcpRelayConnector {
    fn connect(&mut self, target: SocketAddrV4) -> io::Result<Box<dyn RelaySocket>> {
        let addr = SockAddr::from(SocketAddr::V4(target));
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;

        if self.options.nonblocking_connect {
            socket.set_nonblocking(true)?;
            match socket.connect(&addr) {
                Ok(()) => {}
                Err(e) if connect_in_progress(&e) => {
                    debug!(target: LOG_TARGET, "connect to {target} in progress");
                    return Ok(Box::new(TcpRelaySocket {
                        stream: TcpStream::from(socket),
                        options: self.options,
                        connecting: Some(Instant::now()),
                    }));
                }
                Err(e) => return Err(e),
            }
        } else {
            match self.options.connect_timeout {
                Some(timeout) => socket.connect_timeout(&addr, timeout)?,
                None => socket.connect(&addr)?,
            }
        }

        let mut relay = TcpRelaySocket {
            stream: TcpStream::from(socket),
            options: self.options,
            connecting: None,
        };
        relay.configure()?;
        info!(target: LOG_TARGET, "connected to {target}");
        Ok(Box::new(relay))
    }
}

/// A relay connection. Blocking once established.
#[derive(Debug)]
pub struct TcpRelaySocket {
    stream: TcpStream,
    options: TcpRelayOptions,
    /// Set while a non-blocking connect is in flight.
    connecting: Option<Instant>,
}

impl TcpRelaySocket {
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    fn configure(&mut self) -> io::Result<()> {
        self.stream.set_nonblocking(false)?;
        self.stream.set_nodelay(self.options.nodelay)?;
        self.stream.set_read_timeout(self.options.read_timeout)?;
        self.stream.set_write_timeout(self.options.write_timeout)?;
        self.connecting = None;
        Ok(())
    }
}

impl RelaySocket for TcpRelaySocket {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    fn recv_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.stream.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    fn poll_connected(&mut self) -> io::Result<bool> {
        let Some(started) = self.connecting else {
            return Ok(true);
        };

        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }

        match self.stream.peer_addr() {
            Ok(peer) => {
                self.configure()?;
                info!(target: LOG_TARGET, "connected to {peer}");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                if let Some(timeout) = self.options.connect_timeout {
                    if started.elapsed() >= timeout {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
                    }
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
