//! TCP relay tunnelled through SIODATA8.
//!
//! Guest programs drive a socket by writing framed commands to the 8-bit data
//! register and then streaming payload bytes through the same register. The
//! relay runs beside the link-mode logic in [`crate::serial`] and ignores the
//! link mode entirely.
//!
//! A frame is `0x89`, a command code, the command's argument bytes and a
//! `0xFE` terminator:
//!
//! | Code | Command    | Arguments                                   |
//! |------|------------|---------------------------------------------|
//! | 0x02 | Send       | CRC32 (LE), length (LE); payload follows    |
//! | 0x03 | Recv       | none; reuses the last Send length           |
//! | 0x04 | Duplex     | CRC32, length (not implemented)             |
//! | 0x05 | Connect    | IPv4 (LE), port (LE)                        |
//! | 0x06 | Disconnect | none                                        |
//! | 0x07 | Lookup     | host name (not implemented)                 |
//!
//! Malformed frames and commands whose preconditions fail are swallowed. The
//! guest only learns about a failure by the absence of the data it expected.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use log::{debug, info, trace, warn};

const LOG_TARGET: &str = "gba.sio.relay";

/// Byte that opens a command frame while idle.
pub const FRAME_START: u8 = 0x89;
/// Byte that closes a command frame.
pub const FRAME_END: u8 = 0xFE;
/// Returned by reads when the relay has nothing to deliver.
pub const NO_DATA: u8 = 0xDA;
/// Returned by reads while a connection is being established.
pub const CONNECT_PENDING: u8 = 0x00;
/// Size of the command buffer, including the command code.
pub const COMMAND_BUFFER_SIZE: usize = 255;
/// Code plus four address/CRC bytes plus two port/length bytes.
const ADDRESSED_COMMAND_LEN: usize = 7;

/// Where Connect goes unless the requested target is honored.
pub const DEFAULT_RELAY_TARGET: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3301);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The relay's own transfer state, independent of the link mode.
pub enum TransferMode {
    Idle,
    Parse,
    Send,
    Recv,
    SendRecv,
    Estab,
    Reserved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayCommand {
    Send = 0x02,
    Recv = 0x03,
    Duplex = 0x04,
    Connect = 0x05,
    Disconnect = 0x06,
    Lookup = 0x07,
}

impl TryFrom<u8> for RelayCommand {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            0x02 => Ok(RelayCommand::Send),
            0x03 => Ok(RelayCommand::Recv),
            0x04 => Ok(RelayCommand::Duplex),
            0x05 => Ok(RelayCommand::Connect),
            0x06 => Ok(RelayCommand::Disconnect),
            0x07 => Ok(RelayCommand::Lookup),
            other => Err(other),
        }
    }
}

/// A connected stream owned by the relay.
pub trait RelaySocket: Send {
    /// Writes all of `bytes`.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads exactly one byte.
    fn recv_byte(&mut self) -> io::Result<u8>;

    /// Reports whether a connection started without blocking has completed.
    /// Blocking transports are connected as soon as they exist.
    fn poll_connected(&mut self) -> io::Result<bool> {
        Ok(true)
    }

    fn shutdown(&mut self) -> io::Result<()>;
}

/// Opens relay sockets.
pub trait RelayConnector: Send {
    fn connect(&mut self, target: SocketAddrV4) -> io::Result<Box<dyn RelaySocket>>;
}

/// A connector for hosts without networking. Every Connect fails.
#[derive(Debug, Default)]
pub struct NullConnector;

impl RelayConnector for NullConnector {
    fn connect(&mut self, target: SocketAddrV4) -> io::Result<Box<dyn RelaySocket>> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("no relay transport for {target}"),
        ))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Endpoint every Connect command is sent to.
    pub target: SocketAddrV4,
    /// Connect to the address carried by the Connect frame instead of
    /// `target`.
    pub honor_requested_target: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_RELAY_TARGET,
            honor_requested_target: false,
        }
    }
}

/// The relay state machine behind SIODATA8.
pub struct RelayEngine {
    mode: TransferMode,
    cmd: [u8; COMMAND_BUFFER_SIZE],
    cursor: usize,
    crc: u32,
    /// Shared by Send and Recv: Recv reuses whatever the last Send set.
    len: u16,
    len_out: u16,
    in_count: u32,
    out_count: u32,
    requested: Option<SocketAddrV4>,
    socket: Option<Box<dyn RelaySocket>>,
    connector: Box<dyn RelayConnector>,
    config: RelayConfig,
}

impl fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayEngine")
            .field("mode", &self.mode)
            .field("cursor", &self.cursor)
            .field("len", &self.len)
            .field("connected", &self.socket.is_some())
            .finish_non_exhaustive()
    }
}

impl RelayEngine {
    pub fn new(connector: Box<dyn RelayConnector>, config: RelayConfig) -> Self {
        Self {
            mode: TransferMode::Idle,
            cmd: [0; COMMAND_BUFFER_SIZE],
            cursor: 0,
            crc: 0,
            len: 0,
            len_out: 0,
            in_count: 0,
            out_count: 0,
            requested: None,
            socket: None,
            connector,
            config,
        }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Bytes of the frame being parsed, or of the last dispatched frame.
    pub fn command(&self) -> &[u8] {
        &self.cmd[..self.cursor]
    }

    /// Payload length from the last Send command.
    pub fn pending_len(&self) -> u16 {
        self.len
    }

    /// CRC from the last Send command.
    pub fn pending_crc(&self) -> u32 {
        self.crc
    }

    /// Address carried by the last Connect command.
    pub fn requested_target(&self) -> Option<SocketAddrV4> {
        self.requested
    }

    /// Closes the socket and returns to the power-on state.
    pub fn reset(&mut self) {
        self.close_socket();
        self.mode = TransferMode::Idle;
        self.cmd = [0; COMMAND_BUFFER_SIZE];
        self.cursor = 0;
        self.crc = 0;
        self.len = 0;
        self.len_out = 0;
        self.in_count = 0;
        self.out_count = 0;
        self.requested = None;
    }

    /// A guest write to SIODATA8. Only the low byte is used.
    pub fn write(&mut self, value: u16) {
        let byte = value as u8;
        if cfg!(feature = "relay-trace") {
            trace!(target: LOG_TARGET, "write 0x{byte:02X} in {:?}", self.mode);
        }

        match self.mode {
            TransferMode::Idle => self.write_idle(byte),
            TransferMode::Parse => self.write_parse(byte),
            TransferMode::Send | TransferMode::SendRecv => self.write_payload(byte),
            TransferMode::Recv | TransferMode::Estab | TransferMode::Reserved => {}
        }
    }

    /// A guest read of SIODATA8.
    pub fn read(&mut self) -> u16 {
        let byte = match self.mode {
            TransferMode::Recv | TransferMode::SendRecv => self.read_payload(),
            TransferMode::Estab => self.poll_connect(),
            TransferMode::Idle
            | TransferMode::Parse
            | TransferMode::Send
            | TransferMode::Reserved => NO_DATA,
        };
        if cfg!(feature = "relay-trace") {
            trace!(target: LOG_TARGET, "read 0x{byte:02X} in {:?}", self.mode);
        }
        byte as u16
    }

    fn write_idle(&mut self, byte: u8) {
        if byte == FRAME_START {
            debug!(target: LOG_TARGET, "frame start");
            self.cmd = [0; COMMAND_BUFFER_SIZE];
            self.cursor = 0;
            self.mode = TransferMode::Parse;
        }
    }

    fn write_parse(&mut self, byte: u8) {
        if self.cursor == 0 {
            match byte {
                0x00 | 0x01 | 0xFE..=0xFF => {
                    debug!(target: LOG_TARGET, "frame cancelled by 0x{byte:02X}");
                    self.mode = TransferMode::Idle;
                }
                0x02..=0x07 => {
                    self.cmd[0] = byte;
                    self.cursor = 1;
                }
                // Unknown codes are dropped and the frame stays open.
                _ => {}
            }
        } else if byte == FRAME_END {
            self.dispatch();
        } else if self.cursor < COMMAND_BUFFER_SIZE {
            self.cmd[self.cursor] = byte;
            self.cursor += 1;
        } else {
            debug!(target: LOG_TARGET, "command buffer overflow, frame dropped");
            self.cmd = [0; COMMAND_BUFFER_SIZE];
            self.cursor = 0;
            self.mode = TransferMode::Idle;
        }
    }

    fn dispatch(&mut self) {
        debug!(target: LOG_TARGET, "frame complete: {}", hex_bytes(self.command()));
        self.mode = TransferMode::Idle;

        let Ok(command) = RelayCommand::try_from(self.cmd[0]) else {
            return;
        };
        let addressed = self.cursor >= ADDRESSED_COMMAND_LEN;
        let connected = self.socket.is_some();

        match command {
            RelayCommand::Send if addressed && connected => self.begin_send(),
            RelayCommand::Recv if connected => self.begin_recv(),
            RelayCommand::Duplex if addressed && connected => {
                debug!(target: LOG_TARGET, "full-duplex transfer requested; not implemented");
            }
            RelayCommand::Connect if addressed && !connected => self.connect(),
            RelayCommand::Disconnect if connected => {
                self.close_socket();
                info!(target: LOG_TARGET, "relay disconnected");
            }
            RelayCommand::Lookup => {
                debug!(target: LOG_TARGET, "host lookup requested; not implemented");
            }
            _ => {
                debug!(target: LOG_TARGET, "{command:?} ignored: precondition not met");
            }
        }
    }

    fn begin_send(&mut self) {
        self.crc = u32::from_le_bytes([self.cmd[1], self.cmd[2], self.cmd[3], self.cmd[4]]);
        self.len = u16::from_le_bytes([self.cmd[5], self.cmd[6]]);
        self.out_count = 0;

        let header = [
            self.cmd[2],
            self.cmd[1],
            self.cmd[6],
            self.cmd[5],
            self.cmd[4],
            self.cmd[3],
        ];
        debug!(
            target: LOG_TARGET,
            "send {} bytes, crc 0x{:08X}",
            self.len,
            self.crc
        );
        if !self.socket_send(&header) {
            return;
        }
        if self.len > 0 {
            self.mode = TransferMode::Send;
        }
    }

    fn begin_recv(&mut self) {
        debug!(target: LOG_TARGET, "receive {} bytes", self.len);
        self.in_count = 0;
        if self.len > 0 {
            self.mode = TransferMode::Recv;
        }
    }

    fn connect(&mut self) {
        let ip = u32::from_le_bytes([self.cmd[1], self.cmd[2], self.cmd[3], self.cmd[4]]);
        let port = u16::from_le_bytes([self.cmd[5], self.cmd[6]]);
        let requested = SocketAddrV4::new(Ipv4Addr::from(ip), port);
        self.requested = Some(requested);

        let target = if self.config.honor_requested_target {
            requested
        } else {
            self.config.target
        };
        info!(target: LOG_TARGET, "connect requested to {requested}, dialing {target}");
        self.mode = TransferMode::Estab;

        match self.connector.connect(target) {
            Ok(socket) => {
                self.socket = Some(socket);
                self.poll_connect();
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "connect to {target} failed: {e}");
                self.mode = TransferMode::Idle;
            }
        }
    }

    fn poll_connect(&mut self) -> u8 {
        let Some(socket) = self.socket.as_mut() else {
            self.mode = TransferMode::Idle;
            return CONNECT_PENDING;
        };
        match socket.poll_connected() {
            Ok(true) => {
                info!(target: LOG_TARGET, "relay connected");
                self.mode = TransferMode::Idle;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(target: LOG_TARGET, "connect failed: {e}");
                self.socket = None;
                self.mode = TransferMode::Idle;
            }
        }
        CONNECT_PENDING
    }

    fn write_payload(&mut self, byte: u8) {
        if !self.socket_send(&[byte]) {
            return;
        }
        self.out_count += 1;
        if self.transfer_complete() {
            debug!(target: LOG_TARGET, "send complete");
            self.mode = TransferMode::Idle;
        }
    }

    fn read_payload(&mut self) -> u8 {
        let Some(socket) = self.socket.as_mut() else {
            self.mode = TransferMode::Idle;
            return NO_DATA;
        };
        match socket.recv_byte() {
            Ok(byte) => {
                self.in_count += 1;
                if self.transfer_complete() {
                    debug!(target: LOG_TARGET, "receive complete");
                    self.mode = TransferMode::Idle;
                }
                byte
            }
            Err(e) => {
                warn!(target: LOG_TARGET, "relay receive failed: {e}");
                self.drop_socket();
                NO_DATA
            }
        }
    }

    fn transfer_complete(&self) -> bool {
        match self.mode {
            TransferMode::Send => self.out_count >= u32::from(self.len),
            TransferMode::Recv => self.in_count >= u32::from(self.len),
            TransferMode::SendRecv => {
                self.out_count >= u32::from(self.len_out) && self.in_count >= u32::from(self.len)
            }
            _ => false,
        }
    }

    /// Sends `bytes`, dropping the socket and idling on failure.
    fn socket_send(&mut self, bytes: &[u8]) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            self.mode = TransferMode::Idle;
            return false;
        };
        match socket.send(bytes) {
            Ok(()) => true,
            Err(e) => {
                warn!(target: LOG_TARGET, "relay send failed: {e}");
                self.drop_socket();
                false
            }
        }
    }

    fn drop_socket(&mut self) {
        self.close_socket();
        self.mode = TransferMode::Idle;
    }

    fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.shutdown() {
                debug!(target: LOG_TARGET, "socket shutdown: {e}");
            }
        }
    }
}

impl Drop for RelayEngine {
    fn drop(&mut self) {
        self.close_socket();
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
