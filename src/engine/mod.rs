//! The protocol engine seam.
//!
//! An [`Engine`] does the actual TLS/DTLS work: record protection,
//! handshake messages, certificate checks. The session drives it through
//! this trait and never looks inside. Engines talk to the wire only
//! through the [`Bridge`] they are given at setup.

use crate::bridge::Bridge;
use crate::error::{EngineError, SetupError};
use crate::timer::TimerHandle;
use crate::transport::{Transport, TransportKind};
use crate::trust::TrustMaterial;
use crate::{Config, Role};

mod ossl;
pub use ossl::OsslEngine;

/// Result of an engine operation that may need transport readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<T> {
    Ready(T),
    /// Retry once the transport is readable.
    WantRead,
    /// Retry once the transport is writable.
    WantWrite,
}

impl<T> Progress<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Progress::Ready(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Progress<U> {
        match self {
            Progress::Ready(v) => Progress::Ready(f(v)),
            Progress::WantRead => Progress::WantRead,
            Progress::WantWrite => Progress::WantWrite,
        }
    }
}

/// Everything an engine needs to configure a session.
#[derive(Debug)]
pub struct SessionParams<'a> {
    pub role: Role,
    pub kind: TransportKind,
    pub trust: Option<&'a TrustMaterial>,
    pub server_name: Option<&'a str>,
    /// Identity of the remote end. DTLS servers bind cookies to it.
    pub transport_id: Option<Vec<u8>>,
    pub config: &'a Config,
}

/// Capability interface of a TLS/DTLS implementation.
///
/// One engine value is one session. It owns the transport, inside its
/// [`Bridge`], until [`Engine::release`].
pub trait Engine<T: Transport>: Sized {
    /// Build a session around `bridge`.
    ///
    /// Verify mode, own certificate, server name, cookies and MTU are all
    /// applied here. On error the bridge, and with it the transport, is
    /// handed back so the caller can close it.
    fn setup(bridge: Bridge<T>, params: &SessionParams<'_>)
        -> Result<Self, (SetupError, Bridge<T>)>;

    /// Advance the handshake as far as the transport allows.
    ///
    /// Datagram engines get the retransmission timer and arm it while
    /// waiting for a flight.
    fn handshake_step(
        &mut self,
        timer: Option<&mut TimerHandle<'_>>,
    ) -> Result<Progress<()>, EngineError>;

    /// Resend the last flight. Called when the intermediate deadline passes.
    fn retransmit(
        &mut self,
        timer: Option<&mut TimerHandle<'_>>,
    ) -> Result<Progress<()>, EngineError>;

    /// Decrypt application data. `Ready(0)` is an orderly close by the peer.
    fn read(&mut self, buf: &mut [u8]) -> Result<Progress<usize>, EngineError>;

    /// Encrypt application data. May accept fewer bytes than given.
    fn write(&mut self, buf: &[u8]) -> Result<Progress<usize>, EngineError>;

    /// Peer certificate, DER.
    fn peer_certificate(&self) -> Option<Vec<u8>>;

    /// Send close_notify.
    fn close_notify(&mut self) -> Result<Progress<()>, EngineError>;

    fn transport(&self) -> Option<&T>;

    fn transport_mut(&mut self) -> Option<&mut T>;

    /// Tear down all protocol state and hand back the transport.
    fn release(self) -> Option<T>;
}
