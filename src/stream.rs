//! The secure stream facade.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::certificate::sha256_fingerprint;
use crate::engine::{Engine, OsslEngine, Progress};
use crate::error::{EngineError, Error, HandshakeError, StreamError};
use crate::handshake::Handshake;
use crate::session::{Role, SecureSession, SessionState};
use crate::transport::{Transport, TransportKind};
use crate::trust::TrustMaterial;
use crate::Options;

/// Wrap `transport` in a TLS or DTLS session.
///
/// Unless `options.nonblocking` is set the handshake is completed before
/// returning. Non-blocking callers drive it with [`SecureStream::handshake`].
pub fn wrap_socket<T: Transport>(
    transport: T,
    options: &Options,
) -> Result<SecureStream<T>, Error> {
    SecureStream::wrap(transport, options)
}

/// A secure session used as a byte stream.
///
/// Implements [`io::Read`], [`io::Write`] and [`Transport`], so it can
/// stand wherever the plain transport could.
pub struct SecureStream<T: Transport, E: Engine<T> = OsslEngine<T>> {
    session: SecureSession<T, E>,
}

impl<T: Transport, E: Engine<T>> SecureStream<T, E> {
    /// [`wrap_socket`] with any engine.
    pub fn wrap(mut transport: T, options: &Options) -> Result<Self, Error> {
        let role = if options.server_side {
            Role::Server
        } else {
            Role::Client
        };

        let trust = match TrustMaterial::decode(
            options.ca_cert.as_deref(),
            options.cert.as_deref(),
            options.key.as_deref().map(|k| k.as_slice()),
        ) {
            Ok(t) => Some(t).filter(|t| !t.is_empty()),
            Err(e) => {
                if let Err(c) = transport.close() {
                    warn!("Closing transport after bad trust material: {}", c);
                }
                return Err(e.into());
            }
        };

        let session = SecureSession::open(
            transport,
            role,
            options.transport_kind,
            trust,
            options.server_hostname.as_deref(),
            Arc::clone(&options.config),
        )?;

        let mut stream = SecureStream { session };
        // Put the transport in the mode the options ask for, whatever
        // mode it came in.
        stream.set_nonblocking(options.nonblocking)?;
        if !options.nonblocking {
            stream.handshake()?;
        }
        Ok(stream)
    }

    pub fn session(&self) -> &SecureSession<T, E> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SecureSession<T, E> {
        &mut self.session
    }

    /// Complete the handshake.
    ///
    /// In non-blocking mode this returns `StreamError::WouldBlock` whenever
    /// the transport is not ready; call again later. In blocking datagram
    /// mode reads are bounded by the retransmission timer so a lost flight
    /// is resent. A stream transport that is not ready despite blocking
    /// mode also gets `WouldBlock`, there is no timer to wait for.
    pub fn handshake(&mut self) -> Result<(), Error> {
        if !self.session.is_nonblocking() {
            self.bound_read_timeout()?;
        }
        loop {
            match self.session.drive()? {
                Handshake::Established => {
                    self.restore_read_timeout()?;
                    return Ok(());
                }
                Handshake::WantRead | Handshake::WantWrite
                    if self.session.is_nonblocking()
                        || self.session.transport_kind() == TransportKind::Stream =>
                {
                    return Err(StreamError::WouldBlock.into());
                }
                Handshake::WantRead | Handshake::WantWrite => self.bound_read_timeout()?,
            }
        }
    }

    fn bound_read_timeout(&mut self) -> Result<(), HandshakeError> {
        if self.session.transport_kind() != TransportKind::Datagram {
            return Ok(());
        }
        // Before the first flight is out there is no deadline yet.
        let wait = match self.session.next_deadline() {
            Some(deadline) => {
                let now = self.session.config().clock().now();
                deadline.saturating_duration_since(now)
            }
            None => self.session.config().flight_start_rto(),
        };
        if let Some(t) = self.session.transport_mut() {
            t.set_read_timeout(Some(wait.max(Duration::from_millis(1))))
                .map_err(HandshakeError::Io)?;
        }
        Ok(())
    }

    fn restore_read_timeout(&mut self) -> Result<(), HandshakeError> {
        let datagram = self.session.transport_kind() == TransportKind::Datagram;
        if !datagram || self.session.is_nonblocking() {
            return Ok(());
        }
        if let Some(t) = self.session.transport_mut() {
            t.set_read_timeout(None).map_err(HandshakeError::Io)?;
        }
        Ok(())
    }

    /// Read decrypted data. `Ok(0)` means the peer closed the session.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let engine = self.session.engine_mut()?;
        if buf.is_empty() {
            return Ok(0);
        }
        match engine.read(buf) {
            Ok(Progress::Ready(n)) => Ok(n),
            Ok(Progress::WantRead | Progress::WantWrite) => Err(StreamError::WouldBlock),
            Err(EngineError::PeerClosed) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Write data, possibly only a prefix of `buf`.
    ///
    /// On `WouldBlock` the same buffer must be offered again.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        let engine = self.session.engine_mut()?;
        if buf.is_empty() {
            return Ok(0);
        }
        match engine.write(buf) {
            Ok(Progress::Ready(n)) => Ok(n),
            Ok(Progress::WantRead | Progress::WantWrite) => Err(StreamError::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    /// The peer's certificate, DER.
    pub fn peer_certificate(&self) -> Result<Vec<u8>, StreamError> {
        self.session
            .engine_ref()?
            .peer_certificate()
            .ok_or(StreamError::NotAvailable)
    }

    /// SHA-256 of the peer's certificate.
    pub fn peer_fingerprint(&self) -> Result<Vec<u8>, StreamError> {
        Ok(sha256_fingerprint(&self.peer_certificate()?))
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), StreamError> {
        self.session.set_nonblocking(nonblocking)
    }

    /// Close the session and the transport. Idempotent.
    pub fn close(&mut self) -> Result<(), StreamError> {
        self.session.close()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn role(&self) -> Role {
        self.session.role()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.session.transport_kind()
    }

    pub fn transport(&self) -> Option<&T> {
        self.session.transport()
    }
}

impl<T: Transport, E: Engine<T>> std::fmt::Debug for SecureStream<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecureStream").field(&self.session).finish()
    }
}

impl<T: Transport, E: Engine<T>> From<SecureSession<T, E>> for SecureStream<T, E> {
    fn from(session: SecureSession<T, E>) -> Self {
        SecureStream { session }
    }
}

impl<T: Transport, E: Engine<T>> io::Read for SecureStream<T, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(SecureStream::read(self, buf)?)
    }
}

impl<T: Transport, E: Engine<T>> io::Write for SecureStream<T, E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(SecureStream::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport, E: Engine<T>> Transport for SecureStream<T, E> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(SecureStream::read(self, buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(SecureStream::write(self, buf)?)
    }

    fn kind(&self) -> TransportKind {
        self.transport_kind()
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        Ok(SecureStream::set_nonblocking(self, nonblocking)?)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.session.transport_mut() {
            Some(t) => t.set_read_timeout(timeout),
            None => Err(StreamError::Closed.into()),
        }
    }

    fn peer_id(&self) -> Option<Vec<u8>> {
        self.transport()?.peer_id()
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(SecureStream::close(self)?)
    }
}
