//! Datagram retransmission timing.
//!
//! DTLS has no reliable transport underneath, so a lost flight is only
//! noticed by waiting. The [`RetransmitTimer`] holds two deadlines: the
//! intermediate one says "resend the last flight", the final one says
//! "give up on the handshake". It never reads a clock by itself; `now`
//! is always passed in, which keeps it deterministic under test.

use std::fmt;
use std::time::{Duration, Instant};

use crate::JitterRng;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock, [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Result of polling a [`RetransmitTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Not armed.
    Inactive,
    /// Armed, neither deadline passed.
    Waiting,
    /// The intermediate deadline passed. Time to retransmit.
    IntermediateExpired,
    /// The final deadline passed. The handshake is over.
    FinalExpired,
}

impl TimerState {
    /// Legacy integer form: -1 inactive, 0 waiting, 1 intermediate, 2 final.
    pub fn code(&self) -> i32 {
        match self {
            TimerState::Inactive => -1,
            TimerState::Waiting => 0,
            TimerState::IntermediateExpired => 1,
            TimerState::FinalExpired => 2,
        }
    }
}

/// Two-stage deadline.
///
/// Inactive exactly when the final deadline is unset. When active the
/// intermediate deadline is never later than the final one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitTimer {
    intermediate: Option<Instant>,
    fin: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm both deadlines relative to `now`.
    ///
    /// A zero `fin` disarms the timer. An intermediate deadline beyond the
    /// final one is clamped to it.
    pub fn arm(&mut self, now: Instant, intermediate: Duration, fin: Duration) {
        if fin.is_zero() {
            self.disarm();
            return;
        }
        let fin = now + fin;
        self.fin = Some(fin);
        self.intermediate = Some((now + intermediate).min(fin));
    }

    /// Move only the intermediate deadline, keeping the final one.
    ///
    /// Does nothing on an inactive timer.
    pub fn rearm_intermediate(&mut self, now: Instant, intermediate: Duration) {
        if let Some(fin) = self.fin {
            self.intermediate = Some((now + intermediate).min(fin));
        }
    }

    pub fn disarm(&mut self) {
        self.intermediate = None;
        self.fin = None;
    }

    pub fn is_active(&self) -> bool {
        self.fin.is_some()
    }

    /// Classify `now` against the deadlines. Pure, no I/O.
    pub fn poll(&self, now: Instant) -> TimerState {
        let Some(fin) = self.fin else {
            return TimerState::Inactive;
        };
        if now >= fin {
            return TimerState::FinalExpired;
        }
        match self.intermediate {
            Some(i) if now >= i => TimerState::IntermediateExpired,
            _ => TimerState::Waiting,
        }
    }

    /// Time left until the final deadline, zero if it has passed.
    pub fn remaining_final(&self, now: Instant) -> Option<Duration> {
        self.fin.map(|f| f.saturating_duration_since(now))
    }

    /// The earliest deadline still worth waking up for.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.intermediate, self.fin) {
            (Some(i), Some(f)) => Some(i.min(f)),
            (None, f) => f,
            (i, None) => i,
        }
    }
}

/// The timer as lent to an engine for one handshake step.
///
/// Carries the `now` the driver sampled so engines never read a clock.
pub struct TimerHandle<'a> {
    timer: &'a mut RetransmitTimer,
    now: Instant,
}

impl<'a> TimerHandle<'a> {
    pub fn new(timer: &'a mut RetransmitTimer, now: Instant) -> Self {
        TimerHandle { timer, now }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn arm(&mut self, intermediate: Duration, fin: Duration) {
        self.timer.arm(self.now, intermediate, fin);
    }

    pub fn rearm_intermediate(&mut self, intermediate: Duration) {
        self.timer.rearm_intermediate(self.now, intermediate);
    }

    pub fn disarm(&mut self) {
        self.timer.disarm();
    }

    pub fn is_active(&self) -> bool {
        self.timer.is_active()
    }

    pub fn until_final(&self) -> Option<Duration> {
        self.timer.remaining_final(self.now)
    }
}

impl fmt::Debug for TimerHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("timer", &self.timer)
            .finish()
    }
}

const JITTER_MS: f32 = 500.0;
const MIN_RTO: Duration = Duration::from_millis(50);

/// When to resend the current flight.
///
/// Every resend doubles the wait and draws fresh jitter of up to a
/// quarter second either way.
pub struct FlightBackoff {
    start: Duration,
    base: Duration,
    jitter_ms: i32,
    retries: usize,
    remaining: usize,
}

impl FlightBackoff {
    pub fn new(start: Duration, retries: usize, rng: &mut JitterRng) -> Self {
        FlightBackoff {
            start,
            base: start,
            jitter_ms: draw_jitter(rng),
            retries,
            remaining: retries,
        }
    }

    /// A new flight went out.
    pub fn restart(&mut self, rng: &mut JitterRng) {
        self.base = self.start;
        self.jitter_ms = draw_jitter(rng);
        self.remaining = self.retries;
    }

    pub fn rto(&self) -> Duration {
        let shift = Duration::from_millis(self.jitter_ms.unsigned_abs().into());
        let rto = if self.jitter_ms < 0 {
            self.base.saturating_sub(shift)
        } else {
            self.base.saturating_add(shift)
        };
        rto.max(MIN_RTO)
    }

    /// Account for one resend. Once retries run out the RTO stays put.
    pub fn advance(&mut self, rng: &mut JitterRng) {
        if self.remaining == 0 {
            return;
        }
        self.remaining -= 1;
        self.base = self.base.saturating_mul(2);
        self.jitter_ms = draw_jitter(rng);
    }

    pub fn has_retries(&self) -> bool {
        self.remaining != 0
    }
}

fn draw_jitter(rng: &mut JitterRng) -> i32 {
    ((rng.unit() - 0.5) * JITTER_MS) as i32
}

impl fmt::Debug for FlightBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlightBackoff")
            .field("rto", &self.rto())
            .field("remaining", &self.remaining)
            .finish()
    }
}
