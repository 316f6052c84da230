//! Randomness.
//!
//! Two sources with different jobs. Key material and cookie secrets come
//! from the operating system through [`OsRng`], and a session refuses to
//! start without it. Retransmission jitter comes from [`JitterRng`], which
//! can be made deterministic via [`Config::rng_seed`][crate::Config::rng_seed].
//! The seed never reaches anything cryptographic.

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng, TryRngCore};

use crate::SetupError;

/// Check that the OS entropy source can be read.
pub fn check_entropy() -> Result<(), SetupError> {
    let mut sample = [0_u8; 32];
    OsRng
        .try_fill_bytes(&mut sample)
        .map_err(|e| SetupError::Entropy(e.to_string()))?;
    Ok(())
}

/// Fill `buf` from the OS entropy source.
pub(crate) fn os_fill(buf: &mut [u8]) -> Result<(), String> {
    OsRng.try_fill_bytes(buf).map_err(|e| e.to_string())
}

/// Where retransmission jitter comes from.
pub enum JitterRng {
    /// Fixed sequence from [`Config::rng_seed`][crate::Config::rng_seed].
    Seeded(StdRng),
    /// Thread-local generator.
    Thread,
}

impl JitterRng {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => JitterRng::Seeded(StdRng::seed_from_u64(seed)),
            None => JitterRng::Thread,
        }
    }

    /// Uniform in `[0, 1)`.
    pub fn unit(&mut self) -> f32 {
        match self {
            JitterRng::Seeded(rng) => rng.random(),
            JitterRng::Thread => rand::rng().random(),
        }
    }
}

impl std::fmt::Debug for JitterRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JitterRng::Seeded(_) => f.write_str("JitterRng::Seeded"),
            JitterRng::Thread => f.write_str("JitterRng::Thread"),
        }
    }
}
