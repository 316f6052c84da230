//! Shared helpers for integration tests.

#![allow(unused)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tlswrap::certificate::{generate_self_signed, CertifiedKey};
use tlswrap::{
    Bridge, Clock, Config, Engine, EngineError, FlightBackoff, Handshake, HandshakeError,
    JitterRng, Progress, Role, SecureSession, SessionParams, SetupError, TimerHandle, Transfer,
    Transport, TransportKind, TrustMaterial,
};

/// Handshake message types (RFC 6347).
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;

/// Parse handshake message types from a datagram (content_type=22).
pub fn parse_handshake_types(datagram: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        if ctype == 22 && i + 13 < datagram.len() {
            out.push(datagram[i + 13]);
        }
        i += 13 + len;
    }
    out
}

// ---------------------------------------------------------------------------
// Time

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<Instant>,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeClock {
            now: Mutex::new(Instant::now()),
        })
    }

    pub fn advance(&self, d: Duration) {
        *self.now.lock().unwrap() += d;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// In-memory transport

#[derive(Debug, Default)]
struct Pipe {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
}

/// Knobs and observations for one end of a memory pipe.
#[derive(Debug, Default)]
pub struct Wire {
    /// Answer this many reads with `WouldBlock`, even when data is waiting.
    pub read_would_block: usize,
    /// Answer this many writes with `WouldBlock`.
    pub write_would_block: usize,
    /// Swallow this many of the next writes.
    pub drop_next: usize,
    /// Swallow every write.
    pub drop_all: bool,
    /// Everything written, delivered or not.
    pub sent: Vec<Vec<u8>>,
    pub close_count: usize,
    pub nonblocking: bool,
    pub read_timeout: Option<Duration>,
}

/// One end of an in-memory duplex pipe. Never blocks: an empty pipe
/// reads as `WouldBlock`, a closed one as EOF.
pub struct MemoryTransport {
    kind: TransportKind,
    rx: Arc<Mutex<Pipe>>,
    tx: Arc<Mutex<Pipe>>,
    wire: Arc<Mutex<Wire>>,
    name: &'static str,
}

impl MemoryTransport {
    pub fn pair(kind: TransportKind) -> (MemoryTransport, MemoryTransport) {
        let a = Arc::new(Mutex::new(Pipe::default()));
        let b = Arc::new(Mutex::new(Pipe::default()));
        let left = MemoryTransport {
            kind,
            rx: a.clone(),
            tx: b.clone(),
            wire: Arc::default(),
            name: "left",
        };
        let right = MemoryTransport {
            kind,
            rx: b,
            tx: a,
            wire: Arc::default(),
            name: "right",
        };
        (left, right)
    }

    pub fn wire(&self) -> Arc<Mutex<Wire>> {
        self.wire.clone()
    }
}

impl Transport for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut wire = self.wire.lock().unwrap();
            if wire.read_would_block > 0 {
                wire.read_would_block -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
        }

        let mut rx = self.rx.lock().unwrap();
        let Some(mut chunk) = rx.queue.pop_front() else {
            if rx.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if self.kind == TransportKind::Stream && n < chunk.len() {
            rx.queue.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut wire = self.wire.lock().unwrap();
        if wire.write_would_block > 0 {
            wire.write_would_block -= 1;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        if wire.close_count > 0 {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        wire.sent.push(buf.to_vec());
        if wire.drop_all {
            return Ok(buf.len());
        }
        if wire.drop_next > 0 {
            wire.drop_next -= 1;
            return Ok(buf.len());
        }
        self.tx.lock().unwrap().queue.push_back(buf.to_vec());
        Ok(buf.len())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.wire.lock().unwrap().nonblocking = nonblocking;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.wire.lock().unwrap().read_timeout = timeout;
        Ok(())
    }

    fn peer_id(&self) -> Option<Vec<u8>> {
        Some(self.name.as_bytes().to_vec())
    }

    fn close(&mut self) -> io::Result<()> {
        self.wire.lock().unwrap().close_count += 1;
        self.tx.lock().unwrap().closed = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scripted engine

const TOY_HELLO: u8 = 1;
const TOY_SERVER_HELLO: u8 = 2;
const TOY_DATA: u8 = 4;
const TOY_CLOSE: u8 = 5;

/// Certificate the toy server presents.
pub const TOY_CERT: &[u8] = b"toy certificate";

/// A datagram engine with a two message handshake.
///
/// The client sends HELLO and waits for SERVER_HELLO, resending HELLO on
/// the retransmission timer. The server answers every HELLO, also after it
/// is established, so a lost SERVER_HELLO is recovered by the client's
/// retransmission. No cryptography.
pub struct ToyEngine<T: Transport> {
    bridge: Bridge<T>,
    role: Role,
    hello_sent: bool,
    pending: Option<Vec<u8>>,
    peer_cert: Option<Vec<u8>>,
    backoff: FlightBackoff,
    rng: JitterRng,
    timeout: Duration,
}

impl<T: Transport> ToyEngine<T> {
    fn send(&mut self, msg: &[u8]) -> Result<Progress<usize>, EngineError> {
        match self.bridge.send(msg) {
            Transfer::Done(n) => Ok(Progress::Ready(n)),
            Transfer::WantRead => Ok(Progress::WantRead),
            Transfer::WantWrite => Ok(Progress::WantWrite),
            Transfer::Fatal(e) => Err(EngineError::Io(e)),
        }
    }

    fn recv(&mut self) -> Result<Progress<Vec<u8>>, EngineError> {
        let mut buf = vec![0; 2048];
        match self.bridge.recv(&mut buf) {
            Transfer::Done(0) => Err(EngineError::PeerClosed),
            Transfer::Done(n) => {
                buf.truncate(n);
                Ok(Progress::Ready(buf))
            }
            Transfer::WantRead => Ok(Progress::WantRead),
            Transfer::WantWrite => Ok(Progress::WantWrite),
            Transfer::Fatal(e) => Err(EngineError::Io(e)),
        }
    }

    /// Send the pending message, if any.
    fn flush(&mut self) -> Result<Progress<()>, EngineError> {
        if let Some(msg) = self.pending.take() {
            match self.send(&msg)? {
                Progress::Ready(_) => {}
                other => {
                    self.pending = Some(msg);
                    return Ok(other.map(|_| ()));
                }
            }
        }
        Ok(Progress::Ready(()))
    }

    fn server_hello() -> Vec<u8> {
        let mut msg = vec![TOY_SERVER_HELLO];
        msg.extend_from_slice(TOY_CERT);
        msg
    }
}

impl<T: Transport> Engine<T> for ToyEngine<T> {
    fn setup(
        bridge: Bridge<T>,
        params: &SessionParams<'_>,
    ) -> Result<Self, (SetupError, Bridge<T>)> {
        if params.kind != TransportKind::Datagram {
            return Err((SetupError::Config("toy engine is datagram only".into()), bridge));
        }
        let config = params.config;
        let mut rng = JitterRng::new(config.rng_seed());
        let backoff =
            FlightBackoff::new(config.flight_start_rto(), config.flight_retries(), &mut rng);
        Ok(ToyEngine {
            bridge,
            role: params.role,
            hello_sent: false,
            pending: None,
            peer_cert: None,
            backoff,
            rng,
            timeout: config.handshake_timeout(),
        })
    }

    fn handshake_step(
        &mut self,
        mut timer: Option<&mut TimerHandle<'_>>,
    ) -> Result<Progress<()>, EngineError> {
        if self.role == Role::Client && !self.hello_sent {
            self.hello_sent = true;
            self.pending = Some(vec![TOY_HELLO]);
            if let Some(t) = timer.as_deref_mut() {
                self.backoff.restart(&mut self.rng);
                t.arm(self.backoff.rto(), self.timeout);
            }
        }

        match self.flush()? {
            Progress::Ready(()) => {}
            other => return Ok(other),
        }

        loop {
            let msg = match self.recv()? {
                Progress::Ready(msg) => msg,
                other => return Ok(other.map(|_| ())),
            };
            match (self.role, msg.first().copied()) {
                (Role::Client, Some(TOY_SERVER_HELLO)) => {
                    self.peer_cert = Some(msg[1..].to_vec());
                    if let Some(t) = timer.as_deref_mut() {
                        t.disarm();
                    }
                    return Ok(Progress::Ready(()));
                }
                (Role::Server, Some(TOY_HELLO)) => {
                    self.pending = Some(Self::server_hello());
                    return self.flush();
                }
                _ => continue,
            }
        }
    }

    fn retransmit(
        &mut self,
        timer: Option<&mut TimerHandle<'_>>,
    ) -> Result<Progress<()>, EngineError> {
        if self.role == Role::Server {
            return Ok(Progress::WantRead);
        }
        self.backoff.advance(&mut self.rng);
        if let Some(t) = timer {
            if self.backoff.has_retries() {
                t.rearm_intermediate(self.backoff.rto());
            } else {
                let rest = t.until_final().unwrap_or_default();
                t.rearm_intermediate(rest);
            }
        }
        self.pending = Some(vec![TOY_HELLO]);
        match self.flush()? {
            Progress::Ready(()) => Ok(Progress::WantRead),
            other => Ok(other),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<Progress<usize>, EngineError> {
        match self.flush()? {
            Progress::Ready(()) => {}
            other => return Ok(other.map(|_| 0)),
        }
        loop {
            let msg = match self.recv()? {
                Progress::Ready(msg) => msg,
                other => return Ok(other.map(|_| 0)),
            };
            match msg.first().copied() {
                Some(TOY_DATA) => {
                    let n = (msg.len() - 1).min(buf.len());
                    buf[..n].copy_from_slice(&msg[1..1 + n]);
                    return Ok(Progress::Ready(n));
                }
                Some(TOY_CLOSE) => return Ok(Progress::Ready(0)),
                Some(TOY_HELLO) if self.role == Role::Server => {
                    self.pending = Some(Self::server_hello());
                    match self.flush()? {
                        Progress::Ready(()) => continue,
                        other => return Ok(other.map(|_| 0)),
                    }
                }
                _ => continue,
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<Progress<usize>, EngineError> {
        let mut msg = Vec::with_capacity(buf.len() + 1);
        msg.push(TOY_DATA);
        msg.extend_from_slice(buf);
        Ok(self.send(&msg)?.map(|_| buf.len()))
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.peer_cert.clone()
    }

    fn close_notify(&mut self) -> Result<Progress<()>, EngineError> {
        Ok(self.send(&[TOY_CLOSE])?.map(|_| ()))
    }

    fn transport(&self) -> Option<&T> {
        self.bridge.transport()
    }

    fn transport_mut(&mut self) -> Option<&mut T> {
        self.bridge.transport_mut()
    }

    fn release(mut self) -> Option<T> {
        self.bridge.detach()
    }
}

pub type ToySession = SecureSession<MemoryTransport, ToyEngine<MemoryTransport>>;

// ---------------------------------------------------------------------------
// Session helpers

pub fn identity(names: &[&str]) -> CertifiedKey {
    generate_self_signed(names).unwrap()
}

pub fn trust_for(ck: &CertifiedKey) -> TrustMaterial {
    TrustMaterial::identity(&ck.certificate, &ck.private_key).unwrap()
}

pub fn open<E: Engine<MemoryTransport>>(
    transport: MemoryTransport,
    role: Role,
    trust: Option<TrustMaterial>,
    server_name: Option<&str>,
    config: &Arc<Config>,
) -> SecureSession<MemoryTransport, E> {
    SecureSession::open(transport, role, None, trust, server_name, config.clone()).unwrap()
}

/// Drive both sides until established, or until either fails.
pub fn handshake<E: Engine<MemoryTransport>>(
    client: &mut SecureSession<MemoryTransport, E>,
    server: &mut SecureSession<MemoryTransport, E>,
) -> Result<(), HandshakeError> {
    for _ in 0..100 {
        let c = client.drive()?;
        let s = server.drive()?;
        if c == Handshake::Established && s == Handshake::Established {
            return Ok(());
        }
    }
    panic!("handshake did not complete");
}
