//! The wrapped endpoint.
//!
//! A [`Transport`] is anything that can move bytes: a TCP stream, a connected
//! UDP socket, an in-memory pipe. The adapter owns the transport exclusively
//! for the lifetime of a session and closes it exactly once.

use std::io;
use std::net::{Shutdown, TcpStream, UdpSocket};
use std::time::Duration;

/// Whether the transport preserves message boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Reliable byte stream, TLS framing.
    Stream,
    /// Unreliable datagrams, DTLS framing with retransmission.
    Datagram,
}

/// Capability interface of a wrapped socket-like endpoint.
///
/// Non-blocking transports signal "not ready" with
/// [`io::ErrorKind::WouldBlock`]. Every other error is treated as fatal.
pub trait Transport {
    /// Read into `buf`. For datagram transports one call reads one datagram.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`. For datagram transports one call sends one datagram.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Stream or datagram. Queried once when a session is opened.
    fn kind(&self) -> TransportKind;

    /// Switch the transport between blocking and non-blocking mode.
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    /// Bound how long a blocking read may wait.
    ///
    /// Used to wake up for datagram retransmission. Transports that cannot
    /// time out their reads may ignore this.
    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    /// Bytes identifying the remote end, used to bind datagram cookies.
    fn peer_id(&self) -> Option<Vec<u8>> {
        None
    }

    /// Release the endpoint.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(self, buf)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout.map(non_zero))
    }

    fn peer_id(&self) -> Option<Vec<u8>> {
        self.peer_addr().ok().map(|a| a.to_string().into_bytes())
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // Peer already hung up, nothing left to release.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            r => r,
        }
    }
}

/// A UDP socket is expected to be `connect()`ed to its peer.
impl Transport for UdpSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        UdpSocket::set_nonblocking(self, nonblocking)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, timeout.map(non_zero))
    }

    fn peer_id(&self) -> Option<Vec<u8>> {
        self.peer_addr().ok().map(|a| a.to_string().into_bytes())
    }

    fn close(&mut self) -> io::Result<()> {
        // The descriptor is released on drop.
        Ok(())
    }
}

// std rejects a zero read timeout.
fn non_zero(d: Duration) -> Duration {
    d.max(Duration::from_millis(1))
}
