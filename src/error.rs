use std::io;

use thiserror::Error;

use crate::SessionState;

/// Top level error returned by [`wrap_socket`][crate::wrap_socket] and the stream facade.
#[derive(Debug, Error)]
pub enum Error {
    /// The session could not be configured.
    #[error("{0}")]
    Setup(#[from] SetupError),

    /// The handshake failed. The session must still be closed.
    #[error("{0}")]
    Handshake(#[from] HandshakeError),

    /// Record layer failure after establishment.
    #[error("{0}")]
    Stream(#[from] StreamError),
}

/// Fatal errors raised while opening a session.
///
/// These are never retried. Everything acquired before the failure has been
/// released when one of these is returned.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The system random generator could not be seeded.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),

    /// The datagram cookie context could not be created.
    #[error("Cookie setup failed: {0}")]
    Cookie(String),

    /// The certificate (own or CA) could not be parsed.
    #[error("Malformed certificate: {0}")]
    Certificate(String),

    /// The private key could not be parsed.
    #[error("Malformed private key: {0}")]
    Key(String),

    /// The private key does not belong to the certificate.
    #[error("Private key does not match certificate")]
    KeyMismatch,

    /// The engine refused the server name.
    #[error("Server name rejected: {0}")]
    ServerName(String),

    /// Invalid combination of options.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The protocol engine rejected its configuration.
    #[error("Engine configuration rejected: {0}")]
    Engine(String),
}

/// Terminal handshake failures.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Protocol failure, either an alert from the peer or a local decode error.
    #[error("Handshake alert: {0}")]
    Alert(String),

    /// Peer certificate or hostname verification failed.
    #[error("Certificate verification failed: {0}")]
    Certificate(String),

    /// The transport failed during the handshake.
    #[error("Transport failed during handshake: {0}")]
    Io(#[source] io::Error),

    /// Datagram handshake passed its final deadline.
    #[error("Handshake timed out")]
    Timeout,

    /// The peer went away before the handshake completed.
    #[error("Peer closed during handshake")]
    PeerClosed,

    /// `drive` called in a state that has no handshake to drive.
    #[error("No handshake to drive in state {0:?}")]
    InvalidState(SessionState),
}

/// Errors from the record layer.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Not an error as such. The operation needs transport readiness and
    /// must be retried with the same buffer.
    #[error("Operation would block")]
    WouldBlock,

    /// Record layer used before the handshake completed.
    #[error("Session is not established")]
    NotEstablished,

    /// The session has been closed.
    #[error("Session is closed")]
    Closed,

    /// The peer did not present a certificate.
    #[error("Peer certificate not available")]
    NotAvailable,

    /// A record could not be decoded, or the peer sent a fatal alert.
    #[error("Record failure: {0}")]
    Decode(String),

    /// The transport failed.
    #[error("Transport failure: {0}")]
    Io(#[source] io::Error),
}

/// Errors reported by a protocol [`Engine`][crate::Engine].
///
/// Readiness conditions are not errors, see [`Progress`][crate::Progress].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Protocol alert or decode failure.
    #[error("Alert: {0}")]
    Alert(String),

    /// Peer certificate validation failed.
    #[error("Certificate: {0}")]
    Certificate(String),

    /// Fatal transport error passed up through the bridge.
    #[error("Io: {0}")]
    Io(#[source] io::Error),

    /// The peer closed the connection.
    #[error("Peer closed")]
    PeerClosed,
}

impl From<EngineError> for HandshakeError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Alert(s) => HandshakeError::Alert(s),
            EngineError::Certificate(s) => HandshakeError::Certificate(s),
            EngineError::Io(e) => HandshakeError::Io(e),
            EngineError::PeerClosed => HandshakeError::PeerClosed,
        }
    }
}

impl From<EngineError> for StreamError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Alert(s) | EngineError::Certificate(s) => StreamError::Decode(s),
            EngineError::Io(e) => StreamError::Io(e),
            EngineError::PeerClosed => StreamError::Closed,
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(value: StreamError) -> Self {
        match value {
            StreamError::WouldBlock => io::ErrorKind::WouldBlock.into(),
            StreamError::Io(e) => e,
            StreamError::NotEstablished => io::Error::new(io::ErrorKind::NotConnected, value),
            StreamError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, value),
            StreamError::NotAvailable => io::Error::new(io::ErrorKind::NotFound, value),
            StreamError::Decode(_) => io::Error::new(io::ErrorKind::InvalidData, value),
        }
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Stream(e) => e.into(),
            Error::Handshake(HandshakeError::Io(e)) => e,
            Error::Handshake(HandshakeError::Timeout) => {
                io::Error::new(io::ErrorKind::TimedOut, HandshakeError::Timeout)
            }
            Error::Handshake(e) => io::Error::new(io::ErrorKind::ConnectionAborted, e),
            Error::Setup(e) => io::Error::new(io::ErrorKind::InvalidInput, e),
        }
    }
}
