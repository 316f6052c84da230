//! Handshake driver.

use crate::engine::{Engine, Progress};
use crate::error::HandshakeError;
use crate::session::{SecureSession, SessionState};
use crate::timer::{TimerHandle, TimerState};
use crate::transport::Transport;

/// Outcome of one [`SecureSession::drive`] call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    Established,
    /// Call again once the transport is readable, or the timer is due.
    WantRead,
    /// Call again once the transport is writable.
    WantWrite,
}

impl<T: Transport, E: Engine<T>> SecureSession<T, E> {
    /// Advance the handshake as far as the transport allows.
    ///
    /// Never waits. For datagram sessions the retransmission timer is
    /// checked first: a passed final deadline fails the handshake, a
    /// passed intermediate deadline resends the last flight.
    ///
    /// Once established this keeps returning `Established`. After a
    /// failure, or once closed, it returns `InvalidState`.
    pub fn drive(&mut self) -> Result<Handshake, HandshakeError> {
        match self.state {
            SessionState::Handshaking => {}
            SessionState::Established => return Ok(Handshake::Established),
            s => return Err(HandshakeError::InvalidState(s)),
        }

        match self.step() {
            Ok(Progress::Ready(())) => {
                self.state = SessionState::Established;
                if let Some(t) = self.timer.as_mut() {
                    t.disarm();
                }
                debug!("Session established: {:?}", self.role());
                Ok(Handshake::Established)
            }
            Ok(Progress::WantRead) => Ok(Handshake::WantRead),
            Ok(Progress::WantWrite) => Ok(Handshake::WantWrite),
            Err(e) => {
                self.state = SessionState::Failed;
                if let Some(t) = self.timer.as_mut() {
                    t.disarm();
                }
                debug!("Handshake failed: {}", e);
                Err(e)
            }
        }
    }

    fn step(&mut self) -> Result<Progress<()>, HandshakeError> {
        let now = self.config().clock().now();
        let timer_state = self
            .timer
            .as_ref()
            .map(|t| t.poll(now))
            .unwrap_or(TimerState::Inactive);

        let Some(engine) = self.engine.as_mut() else {
            return Err(HandshakeError::InvalidState(self.state));
        };
        let mut handle = self.timer.as_mut().map(|t| TimerHandle::new(t, now));

        match timer_state {
            TimerState::FinalExpired => return Err(HandshakeError::Timeout),
            TimerState::IntermediateExpired => {
                trace!("Retransmitting last flight");
                let progress = engine.retransmit(handle.as_mut())?;
                if progress.is_ready() {
                    return Ok(progress);
                }
            }
            TimerState::Inactive | TimerState::Waiting => {}
        }

        Ok(engine.handshake_step(handle.as_mut())?)
    }
}
