use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use log::info;
use socket2::{Domain, Protocol, Socket, Type};

use crate::NetError;

const LOG_TARGET: &str = "siolink.net";

/// The far end of a relay: accepts relay clients on a fixed address.
#[derive(Debug)]
pub struct PeerListener {
    listener: TcpListener,
}

impl PeerListener {
    pub fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let bind = || -> io::Result<TcpListener> {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            socket.set_reuse_address(true)?;
            socket.bind(&addr.into())?;
            socket.listen(16)?;
            Ok(TcpListener::from(socket))
        };
        let listener = bind().map_err(|source| NetError::Bind { addr, source })?;
        info!(target: LOG_TARGET, "listening on {addr}");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Blocks until a relay client connects.
    pub fn accept(&self) -> Result<PeerStream, NetError> {
        let (stream, addr) = self.listener.accept().map_err(NetError::Accept)?;
        info!(target: LOG_TARGET, "accepted relay client {addr}");
        Ok(PeerStream { stream, addr })
    }
}

/// One accepted relay client.
#[derive(Debug)]
pub struct PeerStream {
    stream: TcpStream,
    addr: SocketAddr,
}

impl PeerStream {
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next byte from the client, or `None` once it has closed the stream.
    pub fn recv_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Bytes the client will pull with a Recv command.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    /// Writes every received byte to `out` as two upper-case hex digits per
    /// line until the client disconnects. Returns the number of bytes seen.
    pub fn dump_hex<W: Write>(&mut self, mut out: W) -> io::Result<usize> {
        let mut count = 0;
        while let Some(byte) = self.recv_byte()? {
            writeln!(out, "{byte:02X}")?;
            out.flush()?;
            count += 1;
        }
        Ok(count)
    }
}
