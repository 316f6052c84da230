//! Adapts a [`Transport`] to the send/recv shape a protocol engine expects.
//!
//! It translates the transport's "would block" into the engine's
//! want-read/want-write signal and passes every other failure through as
//! fatal. The only thing it buffers is a copy of the last outgoing flight,
//! and only while a datagram handshake asks for it.

use std::io;

use crate::transport::{Transport, TransportKind};

/// Legacy engine code for "want read".
pub const ENGINE_WANT_READ: i32 = -0x6900;

/// Legacy engine code for "want write".
pub const ENGINE_WANT_WRITE: i32 = -0x6880;

const EIO: i32 = 5;

/// Outcome of a single bridge transfer.
#[derive(Debug)]
pub enum Transfer {
    /// This many bytes moved.
    Done(usize),
    /// The transport had nothing to read yet.
    WantRead,
    /// The transport could not accept a write yet.
    WantWrite,
    /// Unrecoverable transport failure.
    Fatal(io::Error),
}

impl Transfer {
    /// The transfer folded into a single integer, the way C engines expect it.
    ///
    /// Byte counts are non-negative, want-read/want-write use the engine
    /// constants, fatal errors are the negated OS error code.
    pub fn engine_code(&self) -> i32 {
        match self {
            Transfer::Done(n) => (*n).min(i32::MAX as usize) as i32,
            Transfer::WantRead => ENGINE_WANT_READ,
            Transfer::WantWrite => ENGINE_WANT_WRITE,
            Transfer::Fatal(e) => -e.raw_os_error().unwrap_or(EIO),
        }
    }
}

/// Owns the transport on behalf of the engine.
pub struct Bridge<T> {
    transport: Option<T>,
    kind: TransportKind,
    flight: Flight,
}

/// Datagrams written through `io::Write` since the engine last read.
#[derive(Debug, Default)]
struct Flight {
    recording: bool,
    // Set by a read, the next write starts a new flight.
    complete: bool,
    datagrams: Vec<Vec<u8>>,
}

impl Flight {
    fn written(&mut self, datagram: &[u8]) {
        if !self.recording {
            return;
        }
        if self.complete {
            self.datagrams.clear();
            self.complete = false;
        }
        self.datagrams.push(datagram.to_vec());
    }

    fn read(&mut self) {
        if self.recording && !self.datagrams.is_empty() {
            self.complete = true;
        }
    }
}

impl<T: Transport> Bridge<T> {
    pub fn new(transport: T, kind: TransportKind) -> Self {
        Bridge {
            transport: Some(transport),
            kind,
            flight: Flight::default(),
        }
    }

    /// A bridge with no transport behind it.
    pub(crate) fn detached(kind: TransportKind) -> Self {
        Bridge {
            transport: None,
            kind,
            flight: Flight::default(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    /// Take the transport out. Every later transfer is fatal.
    pub fn detach(&mut self) -> Option<T> {
        self.transport.take()
    }

    /// Keep a copy of each outgoing flight written through `io::Write`.
    ///
    /// A flight is everything written between two successful reads.
    /// Turning recording off drops the copy.
    pub fn record_flights(&mut self, on: bool) {
        self.flight.recording = on;
        if !on {
            self.flight.complete = false;
            self.flight.datagrams.clear();
        }
    }

    /// Datagrams in the recorded flight.
    pub fn flight_len(&self) -> usize {
        self.flight.datagrams.len()
    }

    /// Send the recorded flight again, byte for byte.
    ///
    /// `Done` carries the number of datagrams sent. Stops at the first
    /// datagram the transport does not take.
    pub fn resend_flight(&mut self) -> Transfer {
        let Some(t) = self.transport.as_mut() else {
            return Transfer::Fatal(detached());
        };
        for (i, datagram) in self.flight.datagrams.iter().enumerate() {
            match t.write(datagram) {
                Ok(_) => {}
                Err(e) if is_not_ready(&e) => {
                    debug!("Flight resend stopped after {} datagrams", i);
                    return Transfer::WantWrite;
                }
                Err(e) => return Transfer::Fatal(e),
            }
        }
        trace!("Resent flight of {} datagrams", self.flight.datagrams.len());
        Transfer::Done(self.flight.datagrams.len())
    }

    /// Engine send callback.
    pub fn send(&mut self, buf: &[u8]) -> Transfer {
        let Some(t) = self.transport.as_mut() else {
            return Transfer::Fatal(detached());
        };
        match t.write(buf) {
            Ok(n) => {
                trace!("Bridge sent {} of {} bytes", n, buf.len());
                Transfer::Done(n)
            }
            Err(e) if is_not_ready(&e) => Transfer::WantWrite,
            Err(e) => {
                debug!("Bridge send failed: {}", e);
                Transfer::Fatal(e)
            }
        }
    }

    /// Engine receive callback.
    pub fn recv(&mut self, buf: &mut [u8]) -> Transfer {
        let Some(t) = self.transport.as_mut() else {
            return Transfer::Fatal(detached());
        };
        match t.read(buf) {
            Ok(n) => {
                trace!("Bridge received {} bytes", n);
                Transfer::Done(n)
            }
            Err(e) if is_not_ready(&e) => Transfer::WantRead,
            Err(e) => {
                debug!("Bridge receive failed: {}", e);
                Transfer::Fatal(e)
            }
        }
    }
}

// A blocking read that hit its timeout is the same as "nothing yet".
fn is_not_ready(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

// BrokenPipe rather than NotConnected: openssl retries on NotConnected.
fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport detached")
}

impl<T: Transport> io::Read for Bridge<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.recv(buf) {
            Transfer::Done(n) => {
                if n > 0 {
                    self.flight.read();
                }
                Ok(n)
            }
            Transfer::WantRead | Transfer::WantWrite => Err(io::ErrorKind::WouldBlock.into()),
            Transfer::Fatal(e) => Err(e),
        }
    }
}

impl<T: Transport> io::Write for Bridge<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.send(buf) {
            Transfer::Done(n) => {
                self.flight.written(&buf[..n]);
                Ok(n)
            }
            Transfer::WantRead | Transfer::WantWrite => Err(io::ErrorKind::WouldBlock.into()),
            Transfer::Fatal(e) => Err(e),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
