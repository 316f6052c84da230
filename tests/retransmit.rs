//! Flight retransmission and handshake timeout, driven by a fake clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tlswrap::{
    Config, Handshake, HandshakeError, OsslEngine, Role, SecureSession, SecureStream,
    SessionState, StreamError, TransportKind,
};

type Ossl = OsslEngine<MemoryTransport>;

fn config(clock: &Arc<FakeClock>) -> Arc<Config> {
    Arc::new(
        Config::builder()
            .flight_start_rto(Duration::from_secs(1))
            .flight_retries(4)
            .handshake_timeout(Duration::from_secs(10))
            .rng_seed(7)
            .clock(clock.clone())
            .build()
            .unwrap(),
    )
}

#[test]
fn lost_first_flight_is_resent() {
    let _ = env_logger::try_init();

    let clock = FakeClock::new();
    let config = config(&clock);
    let (c, s) = MemoryTransport::pair(TransportKind::Datagram);
    let client_wire = c.wire();
    client_wire.lock().unwrap().drop_next = 1;

    let mut client: ToySession = open(c, Role::Client, None, None, &config);
    let mut server: ToySession = open(s, Role::Server, None, None, &config);

    assert_eq!(client.drive().unwrap(), Handshake::WantRead);
    assert_eq!(server.drive().unwrap(), Handshake::WantRead);
    assert!(client.next_deadline().is_some());

    // Not due yet.
    clock.advance(Duration::from_millis(500));
    assert_eq!(client.drive().unwrap(), Handshake::WantRead);
    assert_eq!(client_wire.lock().unwrap().sent.len(), 1);

    clock.advance(Duration::from_millis(1500));
    assert_eq!(client.drive().unwrap(), Handshake::WantRead);
    assert_eq!(client_wire.lock().unwrap().sent.len(), 2);

    assert_eq!(server.drive().unwrap(), Handshake::Established);
    assert_eq!(client.drive().unwrap(), Handshake::Established);
    assert!(client.next_deadline().is_none());

    let sent = client_wire.lock().unwrap().sent.clone();
    assert_eq!(sent[0], sent[1]);

    let client = SecureStream::from(client);
    assert_eq!(client.peer_certificate().unwrap(), TOY_CERT);
}

#[test]
fn lost_reply_is_recovered_by_client_resend() {
    let _ = env_logger::try_init();

    let clock = FakeClock::new();
    let config = config(&clock);
    let (c, s) = MemoryTransport::pair(TransportKind::Datagram);
    s.wire().lock().unwrap().drop_next = 1;

    let mut client: ToySession = open(c, Role::Client, None, None, &config);
    let mut server: ToySession = open(s, Role::Server, None, None, &config);

    assert_eq!(client.drive().unwrap(), Handshake::WantRead);
    // Server is done as soon as its reply is out, even though it was lost.
    assert_eq!(server.drive().unwrap(), Handshake::Established);
    assert_eq!(client.drive().unwrap(), Handshake::WantRead);

    clock.advance(Duration::from_secs(2));
    assert_eq!(client.drive().unwrap(), Handshake::WantRead);

    // The established server answers the repeated hello from its read path.
    let mut server = SecureStream::from(server);
    let mut buf = [0u8; 16];
    assert!(matches!(
        server.read(&mut buf),
        Err(StreamError::WouldBlock)
    ));

    assert_eq!(client.drive().unwrap(), Handshake::Established);
}

#[test]
fn silent_peer_times_out() {
    let _ = env_logger::try_init();

    let clock = FakeClock::new();
    let config = config(&clock);
    let (c, _s) = MemoryTransport::pair(TransportKind::Datagram);
    let client_wire = c.wire();
    client_wire.lock().unwrap().drop_all = true;

    let mut client: ToySession = open(c, Role::Client, None, None, &config);

    let mut failure = None;
    for _ in 0..200 {
        match client.drive() {
            Ok(Handshake::WantRead) => clock.advance(Duration::from_millis(250)),
            Ok(other) => panic!("unexpected {other:?}"),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    assert!(matches!(failure, Some(HandshakeError::Timeout)), "{failure:?}");
    assert_eq!(client.state(), SessionState::Failed);
    assert!(client.next_deadline().is_none());
    assert!(matches!(
        client.drive(),
        Err(HandshakeError::InvalidState(SessionState::Failed))
    ));

    // First flight plus resends at roughly 1s, 3s and 7s.
    let sent = client_wire.lock().unwrap().sent.len();
    assert!((3..=5).contains(&sent), "{sent} flights sent");

    client.close().unwrap();
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(client_wire.lock().unwrap().close_count, 1);
}

#[test]
fn stream_sessions_have_no_timer() {
    let _ = env_logger::try_init();

    let clock = FakeClock::new();
    let config = config(&clock);
    let (c, _s) = MemoryTransport::pair(TransportKind::Stream);

    let err = tlswrap::SecureSession::<_, ToyEngine<_>>::open(
        c,
        Role::Client,
        None,
        None,
        None,
        config.clone(),
    )
    .unwrap_err();
    assert!(matches!(err, tlswrap::SetupError::Config(_)));

    // Forcing the datagram kind over a stream transport gets a timer.
    let (c, _s) = MemoryTransport::pair(TransportKind::Stream);
    let mut client = tlswrap::SecureSession::<_, ToyEngine<_>>::open(
        c,
        Role::Client,
        Some(TransportKind::Datagram),
        None,
        None,
        config,
    )
    .unwrap();
    assert_eq!(client.transport_kind(), TransportKind::Datagram);
    assert_eq!(client.drive().unwrap(), Handshake::WantRead);
    assert!(client.next_deadline().is_some());
}

#[test]
fn openssl_resends_lost_client_hello_on_the_session_clock() {
    let _ = env_logger::try_init();

    let clock = FakeClock::new();
    let config = config(&clock);
    let server_id = identity(&["localhost"]);

    let (c, s) = MemoryTransport::pair(TransportKind::Datagram);
    let client_wire = c.wire();
    client_wire.lock().unwrap().drop_next = 1;

    let mut client: SecureSession<_, Ossl> = open(c, Role::Client, None, None, &config);
    let mut server: SecureSession<_, Ossl> =
        open(s, Role::Server, Some(trust_for(&server_id)), None, &config);

    assert_eq!(client.drive().unwrap(), Handshake::WantRead);
    assert_eq!(server.drive().unwrap(), Handshake::WantRead);
    assert_eq!(client_wire.lock().unwrap().sent.len(), 1);

    // Not due on the session clock.
    assert_eq!(client.drive().unwrap(), Handshake::WantRead);
    assert_eq!(client_wire.lock().unwrap().sent.len(), 1);

    clock.advance(Duration::from_secs(2));
    assert_eq!(client.drive().unwrap(), Handshake::WantRead);

    let sent = client_wire.lock().unwrap().sent.clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
    assert_eq!(parse_handshake_types(&sent[1]), vec![CLIENT_HELLO]);

    handshake(&mut client, &mut server).unwrap();
    assert!(client.next_deadline().is_none());
}

#[test]
fn openssl_gives_up_at_the_handshake_timeout() {
    let _ = env_logger::try_init();

    let clock = FakeClock::new();
    let config = config(&clock);
    let (c, _s) = MemoryTransport::pair(TransportKind::Datagram);
    let client_wire = c.wire();
    client_wire.lock().unwrap().drop_all = true;

    let mut client: SecureSession<_, Ossl> = open(c, Role::Client, None, None, &config);

    let mut failure = None;
    for _ in 0..200 {
        match client.drive() {
            Ok(Handshake::WantRead) => clock.advance(Duration::from_millis(250)),
            Ok(other) => panic!("unexpected {other:?}"),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    assert!(matches!(failure, Some(HandshakeError::Timeout)), "{failure:?}");

    let sent = client_wire.lock().unwrap().sent.clone();
    let replays = sent.iter().filter(|d| **d == sent[0]).count();
    assert!(replays >= 3, "{replays} copies of the first flight");

    client.close().unwrap();
    assert_eq!(client_wire.lock().unwrap().close_count, 1);
}
