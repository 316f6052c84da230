use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::timer::{Clock, SystemClock};
use crate::{SetupError, TransportKind};

/// Ephemeral (EC)DHE with AES-256 or AES-GCM only.
pub const DEFAULT_CIPHER_LIST: &str = "ECDHE+AESGCM:DHE+AESGCM:ECDHE+AES256:DHE+AES256";

const MIN_MTU: usize = 256;

/// Peer certificate verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// Accept any peer certificate, or none.
    #[default]
    None,
    /// Verify a certificate if the peer sends one.
    Optional,
    /// The peer must present a certificate that verifies.
    Required,
}

/// Session configuration
#[derive(Clone)]
pub struct Config {
    mtu: usize,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    verify_mode: VerifyMode,
    cipher_list: String,
    rng_seed: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            flight_start_rto: Duration::from_secs(1),
            flight_retries: 4,
            handshake_timeout: Duration::from_secs(40),
            verify_mode: VerifyMode::None,
            cipher_list: DEFAULT_CIPHER_LIST.to_string(),
            rng_seed: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Max transmission unit.
    ///
    /// The largest datagram a DTLS session will produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Time of first retransmission of a DTLS flight.
    ///
    /// Doubled for every retry with ±0.25s of jitter, measured on
    /// [`clock`][Self::clock]. OpenSSL also keeps its own wall-clock flight
    /// timer and may resend on that schedule in addition.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Max number of retransmissions per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Final deadline for a DTLS handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    #[inline(always)]
    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    /// OpenSSL style cipher list.
    #[inline(always)]
    pub fn cipher_list(&self) -> &str {
        &self.cipher_list
    }

    /// Seed for retransmission jitter.
    ///
    /// Only non-cryptographic randomness follows this seed.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    #[inline(always)]
    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("mtu", &self.mtu)
            .field("flight_start_rto", &self.flight_start_rto)
            .field("flight_retries", &self.flight_retries)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("verify_mode", &self.verify_mode)
            .field("cipher_list", &self.cipher_list)
            .field("rng_seed", &self.rng_seed)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    mtu: usize,
    flight_start_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    verify_mode: VerifyMode,
    cipher_list: String,
    rng_seed: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the time of first retransmission.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the max number of retransmissions per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the final deadline of a DTLS handshake.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Defaults to [`VerifyMode::None`].
    pub fn verify_mode(mut self, mode: VerifyMode) -> Self {
        self.verify_mode = mode;
        self
    }

    pub fn cipher_list(mut self, list: impl Into<String>) -> Self {
        self.cipher_list = list.into();
        self
    }

    /// Make retransmission jitter reproducible.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Replace the time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `SetupError::Config` for values no session could run with.
    pub fn build(self) -> Result<Config, SetupError> {
        if self.mtu < MIN_MTU {
            return Err(SetupError::Config(format!(
                "mtu {} below minimum {}",
                self.mtu, MIN_MTU
            )));
        }
        if self.flight_start_rto.is_zero() {
            return Err(SetupError::Config("flight_start_rto is zero".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(SetupError::Config("handshake_timeout is zero".into()));
        }
        if self.cipher_list.trim().is_empty() {
            return Err(SetupError::Config("empty cipher list".into()));
        }
        Ok(self.finish())
    }

    fn finish(self) -> Config {
        Config {
            mtu: self.mtu,
            flight_start_rto: self.flight_start_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            verify_mode: self.verify_mode,
            cipher_list: self.cipher_list,
            rng_seed: self.rng_seed,
            clock: self.clock,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().finish()
    }
}

/// Arguments to [`wrap_socket`][crate::wrap_socket].
///
/// Certificates and keys are accepted as PEM or DER.
#[derive(Clone, Default)]
pub struct Options {
    /// Own private key.
    pub key: Option<Zeroizing<Vec<u8>>>,
    /// Own certificate. Required for servers.
    pub cert: Option<Vec<u8>>,
    /// Trust anchor for verifying the peer.
    pub ca_cert: Option<Vec<u8>>,
    pub server_side: bool,
    /// Name sent as SNI and, when verifying, matched against the peer certificate.
    pub server_hostname: Option<String>,
    /// Overrides [`Transport::kind`][crate::Transport::kind].
    pub transport_kind: Option<TransportKind>,
    /// Open without completing the handshake. See [`SecureStream::handshake`][crate::SecureStream::handshake].
    pub nonblocking: bool,
    pub config: Arc<Config>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("key", &self.key.as_ref().map(|k| k.len()))
            .field("cert", &self.cert.as_ref().map(|c| c.len()))
            .field("ca_cert", &self.ca_cert.as_ref().map(|c| c.len()))
            .field("server_side", &self.server_side)
            .field("server_hostname", &self.server_hostname)
            .field("transport_kind", &self.transport_kind)
            .field("nonblocking", &self.nonblocking)
            .field("config", &self.config)
            .finish()
    }
}

impl Options {
    /// Client options connecting to `hostname`.
    pub fn client(hostname: impl Into<String>) -> Self {
        Options {
            server_hostname: Some(hostname.into()),
            ..Default::default()
        }
    }

    /// Server options with the given identity.
    pub fn server(cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Options {
            server_side: true,
            cert: Some(cert.into()),
            key: Some(Zeroizing::new(key.into())),
            ..Default::default()
        }
    }
}
