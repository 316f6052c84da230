//! OpenSSL engine, TLS over streams and DTLS over datagrams.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use openssl::dh::Dh;
use openssl::error::ErrorStack;
use openssl::pkey::PKey;
use openssl::ssl::{
    ErrorCode, ShutdownResult, Ssl, SslContext, SslContextBuilder, SslMethod, SslMode, SslOptions,
    SslStream, SslVerifyMode,
};
use openssl::x509::{X509VerifyResult, X509};

use super::{Engine, Progress, SessionParams};
use crate::bridge::{Bridge, Transfer};
use crate::cookie::{CookieJar, COOKIE_LEN};
use crate::error::{EngineError, SetupError};
use crate::timer::{FlightBackoff, TimerHandle};
use crate::transport::{Transport, TransportKind};
use crate::trust::TrustMaterial;
use crate::{JitterRng, Role, VerifyMode};

// Header, explicit nonce, tag and padding of one DTLS record.
const RECORD_OVERHEAD: usize = 128;

/// Per-session OpenSSL state.
///
/// Fields are in reverse order of acquisition so they drop that way.
pub struct OsslEngine<T: Transport> {
    /// The actual openssl TLS stream. Owns the bridge.
    stream: SslStream<Bridge<T>>,

    /// Pins the context the `Ssl` was created from.
    _context: SslContext,

    /// Datagram servers only. Shared with the cookie callbacks.
    _cookies: Option<Arc<CookieJar>>,

    kind: TransportKind,
    max_write: usize,
    handshake_timeout: Duration,
    backoff: FlightBackoff,
    rng: JitterRng,
}

impl<T: Transport> Engine<T> for OsslEngine<T> {
    fn setup(
        mut bridge: Bridge<T>,
        params: &SessionParams<'_>,
    ) -> Result<Self, (SetupError, Bridge<T>)> {
        let (ssl, context, cookies) = match prepare(params) {
            Ok(v) => v,
            Err(e) => return Err((e, bridge)),
        };

        let kind = params.kind;
        if kind == TransportKind::Datagram {
            bridge.record_flights(true);
        }
        let stream = match SslStream::new(ssl, bridge) {
            Ok(v) => v,
            // The bridge went down with the failed stream.
            Err(e) => return Err((engine_err(e), Bridge::detached(kind))),
        };

        let config = params.config;
        let mut rng = JitterRng::new(config.rng_seed());
        let backoff =
            FlightBackoff::new(config.flight_start_rto(), config.flight_retries(), &mut rng);

        let max_write = match kind {
            TransportKind::Stream => usize::MAX,
            TransportKind::Datagram => config.mtu().saturating_sub(RECORD_OVERHEAD),
        };

        debug!("OpenSSL {:?} {:?} session set up", kind, params.role);

        Ok(OsslEngine {
            stream,
            _context: context,
            _cookies: cookies,
            kind,
            max_write,
            handshake_timeout: config.handshake_timeout(),
            backoff,
            rng,
        })
    }

    fn handshake_step(
        &mut self,
        timer: Option<&mut TimerHandle<'_>>,
    ) -> Result<Progress<()>, EngineError> {
        let progress = self.do_handshake()?;

        if let Some(t) = timer {
            match progress {
                Progress::Ready(()) => t.disarm(),
                _ if !t.is_active() => {
                    self.backoff.restart(&mut self.rng);
                    t.arm(self.backoff.rto(), self.handshake_timeout);
                }
                _ => {}
            }
        }

        Ok(progress)
    }

    fn retransmit(
        &mut self,
        timer: Option<&mut TimerHandle<'_>>,
    ) -> Result<Progress<()>, EngineError> {
        self.backoff.advance(&mut self.rng);

        // The bridge holds the records OpenSSL wrote for the last flight.
        // Replaying them verbatim is a valid DTLS retransmission, the peer
        // drops whichever copies it already has.
        let progress = match self.stream.get_mut().resend_flight() {
            Transfer::Done(n) => {
                debug!(
                    "Resent flight of {} datagrams, next rto {:?}",
                    n,
                    self.backoff.rto()
                );
                Progress::WantRead
            }
            Transfer::WantRead => Progress::WantRead,
            Transfer::WantWrite => Progress::WantWrite,
            Transfer::Fatal(e) => return Err(EngineError::Io(e)),
        };

        if let Some(t) = timer {
            if self.backoff.has_retries() {
                t.rearm_intermediate(self.backoff.rto());
            } else {
                let rest = t.until_final().unwrap_or_default();
                t.rearm_intermediate(rest);
            }
        }

        Ok(progress)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Progress<usize>, EngineError> {
        match self.stream.ssl_read(buf) {
            Ok(n) => Ok(Progress::Ready(n)),
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => Ok(Progress::Ready(0)),
            Err(e) => self.classify(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<Progress<usize>, EngineError> {
        let n = buf.len().min(self.max_write);
        match self.stream.ssl_write(&buf[..n]) {
            Ok(n) => Ok(Progress::Ready(n)),
            Err(e) => self.classify(e),
        }
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.stream.ssl().peer_certificate()?.to_der().ok()
    }

    fn close_notify(&mut self) -> Result<Progress<()>, EngineError> {
        match self.stream.shutdown() {
            Ok(ShutdownResult::Sent) | Ok(ShutdownResult::Received) => Ok(Progress::Ready(())),
            Err(e) if e.code() == ErrorCode::ZERO_RETURN => Ok(Progress::Ready(())),
            Err(e) => self.classify(e),
        }
    }

    fn transport(&self) -> Option<&T> {
        self.stream.get_ref().transport()
    }

    fn transport_mut(&mut self) -> Option<&mut T> {
        self.stream.get_mut().transport_mut()
    }

    fn release(mut self) -> Option<T> {
        let transport = self.stream.get_mut().detach();
        trace!("OpenSSL {:?} session released", self.kind);
        transport
    }
}

impl<T: Transport> OsslEngine<T> {
    fn do_handshake(&mut self) -> Result<Progress<()>, EngineError> {
        match self.stream.do_handshake() {
            Ok(()) => {
                self.stream.get_mut().record_flights(false);
                let ssl = self.stream.ssl();
                debug!(
                    "Handshake complete: {} {}",
                    ssl.version_str(),
                    ssl.current_cipher().map(|c| c.name()).unwrap_or("-")
                );
                Ok(Progress::Ready(()))
            }
            Err(e) => self.classify(e),
        }
    }

    fn classify<R>(&self, e: openssl::ssl::Error) -> Result<Progress<R>, EngineError> {
        match e.code() {
            ErrorCode::WANT_READ => Ok(Progress::WantRead),
            ErrorCode::WANT_WRITE => Ok(Progress::WantWrite),
            ErrorCode::ZERO_RETURN => Err(EngineError::PeerClosed),
            ErrorCode::SYSCALL => Err(EngineError::Io(
                e.into_io_error()
                    .unwrap_or_else(|_| io::ErrorKind::UnexpectedEof.into()),
            )),
            _ => {
                let verify = self.stream.ssl().verify_result();
                if verify != X509VerifyResult::OK {
                    Err(EngineError::Certificate(verify.error_string().to_string()))
                } else {
                    Err(EngineError::Alert(e.to_string()))
                }
            }
        }
    }
}

type Prepared = (Ssl, SslContext, Option<Arc<CookieJar>>);

fn prepare(params: &SessionParams<'_>) -> Result<Prepared, SetupError> {
    let mut sample = [0_u8; 16];
    openssl::rand::rand_bytes(&mut sample).map_err(|e| SetupError::Entropy(e.to_string()))?;

    let (context, cookies) = create_ctx(params)?;

    let mut ssl = Ssl::new(&context).map_err(engine_err)?;

    if params.kind == TransportKind::Datagram {
        let mtu = u32::try_from(params.config.mtu())
            .map_err(|_| SetupError::Config("mtu out of range".into()))?;
        ssl.set_mtu(mtu).map_err(engine_err)?;
    }

    match params.role {
        Role::Client => {
            if let Some(name) = params.server_name {
                ssl.set_hostname(name)
                    .map_err(|e| SetupError::ServerName(e.to_string()))?;
                if params.config.verify_mode() != VerifyMode::None {
                    ssl.param_mut()
                        .set_host(name)
                        .map_err(|e| SetupError::ServerName(e.to_string()))?;
                }
            }
            ssl.set_connect_state();
        }
        Role::Server => ssl.set_accept_state(),
    }

    Ok((ssl, context, cookies))
}

fn create_ctx(
    params: &SessionParams<'_>,
) -> Result<(SslContext, Option<Arc<CookieJar>>), SetupError> {
    let config = params.config;

    let method = match params.kind {
        TransportKind::Stream => SslMethod::tls(),
        TransportKind::Datagram => SslMethod::dtls(),
    };
    let mut ctx = SslContextBuilder::new(method).map_err(engine_err)?;

    ctx.set_cipher_list(config.cipher_list())
        .map_err(|e| SetupError::Config(format!("cipher list: {}", e)))?;
    ctx.set_mode(SslMode::ENABLE_PARTIAL_WRITE | SslMode::ACCEPT_MOVING_WRITE_BUFFER);

    let mut options = SslOptions::SINGLE_ECDH_USE;
    if params.kind == TransportKind::Datagram {
        options.insert(SslOptions::NO_DTLSV1);
        options.insert(SslOptions::NO_QUERY_MTU);
    }

    // Enable DHE cipher suites.
    if let Ok(dh) = Dh::get_2048_256() {
        ctx.set_tmp_dh(&dh).map_err(engine_err)?;
    }

    set_verify(&mut ctx, config.verify_mode(), params.trust)?;

    match params.trust.filter(|t| t.has_identity()) {
        Some(trust) => set_identity(&mut ctx, trust)?,
        None if params.role == Role::Server => {
            return Err(SetupError::Config("server requires a certificate".into()))
        }
        None => {}
    }

    let cookies = if params.kind == TransportKind::Datagram && params.role == Role::Server {
        options.insert(SslOptions::COOKIE_EXCHANGE);
        let jar = Arc::new(CookieJar::new()?);
        let peer = params.transport_id.clone().unwrap_or_default();
        set_cookie_callbacks(&mut ctx, jar.clone(), peer);
        Some(jar)
    } else {
        None
    };

    ctx.set_options(options);

    Ok((ctx.build(), cookies))
}

fn set_verify(
    ctx: &mut SslContextBuilder,
    mode: VerifyMode,
    trust: Option<&TrustMaterial>,
) -> Result<(), SetupError> {
    match mode {
        VerifyMode::None => ctx.set_verify(SslVerifyMode::NONE),
        // Verify, but let the handshake continue on failure. The outcome
        // stays readable through the verify result.
        VerifyMode::Optional => ctx.set_verify_callback(SslVerifyMode::PEER, |_ok, _ctx| true),
        VerifyMode::Required => {
            ctx.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT)
        }
    }

    match trust.and_then(|t| t.ca_der()) {
        Some(der) => {
            let ca = X509::from_der(der).map_err(|e| SetupError::Certificate(e.to_string()))?;
            ctx.cert_store_mut().add_cert(ca).map_err(engine_err)?;
        }
        None if mode != VerifyMode::None => {
            ctx.set_default_verify_paths().map_err(engine_err)?;
        }
        None => {}
    }

    Ok(())
}

fn set_identity(ctx: &mut SslContextBuilder, trust: &TrustMaterial) -> Result<(), SetupError> {
    let cert = trust.cert_der().unwrap_or_default();
    let key = trust.key_der().unwrap_or_default();

    let x509 = X509::from_der(cert).map_err(|e| SetupError::Certificate(e.to_string()))?;
    let pkey = PKey::private_key_from_der(key).map_err(|e| SetupError::Key(e.to_string()))?;

    let public = x509
        .public_key()
        .map_err(|e| SetupError::Certificate(e.to_string()))?;
    if !public.public_eq(&pkey) {
        return Err(SetupError::KeyMismatch);
    }

    ctx.set_certificate(&x509).map_err(engine_err)?;
    ctx.set_private_key(&pkey).map_err(engine_err)?;
    ctx.check_private_key()
        .map_err(|_| SetupError::KeyMismatch)?;

    Ok(())
}

fn set_cookie_callbacks(ctx: &mut SslContextBuilder, jar: Arc<CookieJar>, peer: Vec<u8>) {
    let verify_jar = jar.clone();
    let verify_peer = peer.clone();

    ctx.set_cookie_generate_cb(move |_ssl, buf| {
        if buf.len() < COOKIE_LEN {
            return Err(ErrorStack::get());
        }
        buf[..COOKIE_LEN].copy_from_slice(&jar.generate(&peer));
        trace!("Issued DTLS cookie");
        Ok(COOKIE_LEN)
    });

    ctx.set_cookie_verify_cb(move |_ssl, cookie| {
        let ok = verify_jar.verify(&verify_peer, cookie);
        if !ok {
            debug!("Rejected DTLS cookie");
        }
        ok
    });
}

fn engine_err(e: ErrorStack) -> SetupError {
    SetupError::Engine(e.to_string())
}
