//! Host networking for the SIODATA8 relay.
//!
//! [`TcpRelayConnector`] plugs into [`siolink_core::RelayEngine`] and opens real
//! TCP connections with `socket2`. [`PeerListener`] is the other end: a plain
//! listener that accepts one relay client and dumps or answers its bytes.

use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

mod listener;
mod tcp;

pub use listener::{PeerListener, PeerStream};
pub use tcp::{TcpRelayConnector, TcpRelaySocket};

#[derive(Error, Debug)]
pub enum NetError {
    #[error("failed to bind relay peer on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("failed to accept relay client: {0}")]
    Accept(#[source] io::Error),

    #[error("invalid relay option: {0}")]
    InvalidOption(&'static str),
}

/// Socket behavior for relay connections.
///
/// The defaults block indefinitely on connect, send and receive, which stalls
/// the emulation thread while the peer is slow. Timeouts turn a stall into a
/// socket fault, which drops the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpRelayOptions {
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// Disable Nagle so each payload byte leaves as soon as the guest writes it.
    pub nodelay: bool,
    /// Return from Connect at once and let the guest poll SIODATA8 (reads 0
    /// while the handshake is in flight).
    pub nonblocking_connect: bool,
}

impl Default for TcpRelayOptions {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            nodelay: true,
            nonblocking_connect: false,
        }
    }
}

impl TcpRelayOptions {
    /// Rejects zero timeouts, which the socket layer refuses.
    pub fn validate(&self) -> Result<(), NetError> {
        let zero = Some(Duration::ZERO);
        if self.connect_timeout == zero {
            return Err(NetError::InvalidOption("connect timeout must be non-zero"));
        }
        if self.read_timeout == zero {
            return Err(NetError::InvalidOption("read timeout must be non-zero"));
        }
        if self.write_timeout == zero {
            return Err(NetError::InvalidOption("write timeout must be non-zero"));
        }
        Ok(())
    }
}

// Raw OS codes for a connect that has not finished yet. std maps neither to a
// stable `ErrorKind`.
mod errno {
    #[cfg(windows)]
    pub const EINPROGRESS: i32 = 10036; // WSAEINPROGRESS

    #[cfg(windows)]
    pub const EWOULDBLOCK: i32 = 10035; // WSAEWOULDBLOCK

    #[cfg(windows)]
    pub const EALREADY: i32 = 10037; // WSAEALREADY

    #[cfg(not(windows))]
    pub const EINPROGRESS: i32 = 115;

    #[cfg(not(windows))]
    pub const EWOULDBLOCK: i32 = 11;

    #[cfg(not(windows))]
    pub const EALREADY: i32 = 114;
}

pub(crate) fn connect_in_progress(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    matches!(
        err.raw_os_error(),
        Some(code) if code == errno::EINPROGRESS
            || code == errno::EWOULDBLOCK
            || code == errno::EALREADY
    )
}
