//! Session context: one engine, one transport, one lifecycle.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use crate::bridge::Bridge;
use crate::engine::{Engine, OsslEngine, SessionParams};
use crate::rng::check_entropy;
use crate::timer::RetransmitTimer;
use crate::transport::{Transport, TransportKind};
use crate::trust::TrustMaterial;
use crate::{Config, SetupError, StreamError};

/// Which end of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Lifecycle of a [`SecureSession`].
///
/// `Handshaking → Established → Closed` or `Handshaking → Failed → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Established,
    /// The handshake failed. Only `close` is meaningful.
    Failed,
    Closed,
}

/// A TLS or DTLS session over an owned transport.
///
/// The engine owns the transport until [`close`][Self::close], which
/// tears down protocol state first and closes the transport last. A
/// session that is dropped unclosed is closed on drop.
pub struct SecureSession<T: Transport, E: Engine<T> = OsslEngine<T>> {
    pub(crate) engine: Option<E>,
    /// Present exactly for datagram sessions.
    pub(crate) timer: Option<RetransmitTimer>,
    pub(crate) state: SessionState,
    config: Arc<Config>,
    role: Role,
    kind: TransportKind,
    nonblocking: bool,
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport, E: Engine<T>> SecureSession<T, E> {
    /// Open a session over `transport`.
    ///
    /// `kind` defaults to [`Transport::kind`]. The trust material is
    /// consumed, key bytes are wiped once the engine has them. On error
    /// the transport has been closed.
    pub fn open(
        transport: T,
        role: Role,
        kind: Option<TransportKind>,
        trust: Option<TrustMaterial>,
        server_name: Option<&str>,
        config: Arc<Config>,
    ) -> Result<Self, SetupError> {
        if let Err(e) = check_entropy() {
            discard(transport);
            return Err(e);
        }

        let kind = kind.unwrap_or_else(|| transport.kind());
        let transport_id = transport.peer_id();

        let params = SessionParams {
            role,
            kind,
            trust: trust.as_ref(),
            server_name,
            transport_id,
            config: &config,
        };

        let engine = match E::setup(Bridge::new(transport, kind), &params) {
            Ok(v) => v,
            Err((e, mut bridge)) => {
                debug!("Session setup failed: {}", e);
                if let Some(t) = bridge.detach() {
                    discard(t);
                }
                return Err(e);
            }
        };
        drop(params);
        drop(trust);

        let timer = (kind == TransportKind::Datagram).then(RetransmitTimer::new);

        debug!("Session opened: {:?} {:?}", role, kind);

        Ok(SecureSession {
            engine: Some(engine),
            timer,
            state: SessionState::Handshaking,
            config,
            role,
            kind,
            nonblocking: false,
            _transport: PhantomData,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking
    }

    /// The wrapped transport. `None` once closed.
    pub fn transport(&self) -> Option<&T> {
        self.engine.as_ref()?.transport()
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.engine.as_mut()?.transport_mut()
    }

    /// Earliest retransmission deadline, datagram handshakes only.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.as_ref()?.next_deadline()
    }

    /// Forward the mode to the transport and remember it.
    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), StreamError> {
        let transport = self.transport_mut().ok_or(StreamError::Closed)?;
        transport
            .set_nonblocking(nonblocking)
            .map_err(StreamError::Io)?;
        self.nonblocking = nonblocking;
        Ok(())
    }

    /// Close the session. Valid in every state, a no-op once closed.
    ///
    /// An established session sends close_notify first, best effort.
    /// Protocol state is dropped before the transport is closed.
    pub fn close(&mut self) -> Result<(), StreamError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        let was = self.state;
        self.state = SessionState::Closed;
        self.timer = None;

        let Some(mut engine) = self.engine.take() else {
            return Ok(());
        };

        if was == SessionState::Established {
            match engine.close_notify() {
                Ok(p) if p.is_ready() => trace!("close_notify sent"),
                Ok(_) => debug!("close_notify not sent, transport not ready"),
                Err(e) => warn!("close_notify failed: {}", e),
            }
        }

        let transport = engine.release();
        debug!("Session closed from {:?}", was);

        match transport {
            Some(mut t) => t.close().map_err(StreamError::Io),
            None => Ok(()),
        }
    }

    pub(crate) fn engine_mut(&mut self) -> Result<&mut E, StreamError> {
        match self.state {
            SessionState::Established => self.engine.as_mut().ok_or(StreamError::Closed),
            SessionState::Closed => Err(StreamError::Closed),
            SessionState::Handshaking | SessionState::Failed => Err(StreamError::NotEstablished),
        }
    }

    pub(crate) fn engine_ref(&self) -> Result<&E, StreamError> {
        match self.state {
            SessionState::Established => self.engine.as_ref().ok_or(StreamError::Closed),
            SessionState::Closed => Err(StreamError::Closed),
            SessionState::Handshaking | SessionState::Failed => Err(StreamError::NotEstablished),
        }
    }
}

impl<T: Transport, E: Engine<T>> Drop for SecureSession<T, E> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Close on drop failed: {}", e);
        }
    }
}

impl<T: Transport, E: Engine<T>> std::fmt::Debug for SecureSession<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("role", &self.role)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("nonblocking", &self.nonblocking)
            .field("timer", &self.timer)
            .finish()
    }
}

fn discard<T: Transport>(mut transport: T) {
    if let Err(e) = transport.close() {
        warn!("Closing transport after failed setup: {}", e);
    }
}
