//! Stateless DTLS cookies.
//!
//! A DTLS server answers the first ClientHello with a HelloVerifyRequest
//! carrying a cookie, and only commits state once the client echoes it.
//! This keeps a spoofed source address from using the server as an
//! amplifier. cookie = HMAC-SHA256(secret, peer id), where the secret is
//! fresh OS randomness per session.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::rng::os_fill;
use crate::SetupError;

type HmacSha256 = Hmac<Sha256>;

/// Length of every cookie this jar produces.
pub const COOKIE_LEN: usize = 32;

/// Cookie generator and verifier for one DTLS server session.
#[derive(Clone)]
pub struct CookieJar {
    mac: HmacSha256,
}

impl CookieJar {
    /// A jar keyed with a new random secret.
    pub fn new() -> Result<Self, SetupError> {
        let mut secret = Zeroizing::new([0_u8; 32]);
        os_fill(&mut secret[..]).map_err(SetupError::Cookie)?;
        Self::with_secret(&secret[..])
    }

    pub(crate) fn with_secret(secret: &[u8]) -> Result<Self, SetupError> {
        let mac = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|_| SetupError::Cookie("invalid HMAC key".into()))?;
        Ok(CookieJar { mac })
    }

    /// Cookie bound to `peer`.
    pub fn generate(&self, peer: &[u8]) -> [u8; COOKIE_LEN] {
        let mut mac = self.mac.clone();
        mac.update(peer);
        let mut cookie = [0_u8; COOKIE_LEN];
        cookie.copy_from_slice(&mac.finalize().into_bytes());
        cookie
    }

    /// Constant time check of a cookie echoed by `peer`.
    pub fn verify(&self, peer: &[u8], cookie: &[u8]) -> bool {
        if cookie.len() != COOKIE_LEN {
            return false;
        }
        let mut mac = self.mac.clone();
        mac.update(peer);
        mac.verify_slice(cookie).is_ok()
    }
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieJar").finish_non_exhaustive()
    }
}
