//! tlswrap layers a TLS or DTLS session over a byte-stream endpoint and
//! hands back another byte-stream endpoint.
//!
//! The wrapped endpoint is any [`Transport`]: a `TcpStream`, a connected
//! `UdpSocket`, or your own type. Stream transports get TLS, datagram
//! transports get DTLS with cookie exchange and flight retransmission.
//! Both blocking and non-blocking transports are supported.
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::io::{Read, Write};
//! use std::net::TcpStream;
//!
//! let tcp = TcpStream::connect("example.com:443")?;
//! let mut tls = tlswrap::wrap_socket(tcp, &tlswrap::Options::client("example.com"))?;
//!
//! tls.write_all(b"GET / HTTP/1.0\r\n\r\n")?;
//! let mut reply = Vec::new();
//! tls.read_to_end(&mut reply)?;
//! tls.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Sessions are single-owner. Independent sessions share nothing and can
//! live on different threads.
//!
//! The protocol work is done by an [`Engine`]. [`OsslEngine`], backed by
//! OpenSSL, is the default. Anything implementing the trait can be used
//! through [`SecureSession`] and [`SecureStream`] instead.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
extern crate log;

mod bridge;
pub use bridge::{Bridge, Transfer, ENGINE_WANT_READ, ENGINE_WANT_WRITE};

pub mod certificate;

mod config;
pub use config::{Config, ConfigBuilder, Options, VerifyMode, DEFAULT_CIPHER_LIST};

mod cookie;
pub use cookie::{CookieJar, COOKIE_LEN};

mod engine;
pub use engine::{Engine, OsslEngine, Progress, SessionParams};

mod error;
pub use error::{EngineError, Error, HandshakeError, SetupError, StreamError};

mod handshake;
pub use handshake::Handshake;

mod rng;
pub use rng::{check_entropy, JitterRng};

mod session;
pub use session::{Role, SecureSession, SessionState};

mod stream;
pub use stream::{wrap_socket, SecureStream};

mod timer;
pub use timer::{
    Clock, FlightBackoff, RetransmitTimer, SystemClock, TimerHandle, TimerState,
};

mod transport;
pub use transport::{Transport, TransportKind};

mod trust;
pub use trust::TrustMaterial;
