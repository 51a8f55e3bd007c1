mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use common::{MockServer, WAIT, config, dial_session, eventually};
use slsk_client::Session;
use slsk_protocol::messages::init::PierceFirewall;
use slsk_protocol::messages::peer::QueueUpload;
use slsk_protocol::messages::server::{
    CantConnectToPeer, ConnectToPeer, ConnectToPeerResponse, GetPeerAddress,
    GetPeerAddressResponse,
};
use slsk_protocol::{CodeWidth, ConnectionType, Message, Token, read_frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn logged_in(server: &mut MockServer, dir: &std::path::Path) -> Session {
    let session = Session::connect(config(server, "u1", dir)).await.unwrap();
    session.login().await.unwrap();
    server.drain_login().await;
    session
}

/// A loopback port with nothing listening on it.
async fn dead_port() -> u32 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    u32::from(port)
}

fn address(username: &str, ip: Ipv4Addr, port: u32) -> GetPeerAddressResponse {
    GetPeerAddressResponse {
        username: username.into(),
        ip,
        port,
    }
}

/// Reads until the session closes `stream`.
async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("socket should be closed")
        .unwrap_or(0);
    assert_eq!(n, 0);
}

/// Reads one 4-byte-coded frame the session sent on a control socket.
async fn read_queue_upload(stream: &mut TcpStream) -> QueueUpload {
    let frame = tokio::time::timeout(WAIT, read_frame(stream, CodeWidth::Four))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    QueueUpload::from_frame(&frame).unwrap()
}

#[tokio::test]
async fn pierce_firewall_redeems_the_indirect_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = MockServer::start().await;
    let session = logged_in(&mut server, dir.path()).await;
    let port = session.local_port();

    let peer = async {
        server
            .expect_message::<GetPeerAddress>(|m| m.username == "bob")
            .await;
        // Offline as far as the server knows: only the indirect way is left.
        server.send(&address("bob", Ipv4Addr::UNSPECIFIED, 0));
        let request = server
            .expect_message::<ConnectToPeer>(|m| m.username == "bob")
            .await;
        assert_eq!(request.conn_type, ConnectionType::Peer);

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let pierce = PierceFirewall {
            token: request.token,
        };
        stream.write_all(&pierce.to_bytes().unwrap()).await.unwrap();
        (stream, request.token)
    };

    let (conn, (mut pierced, token)) = tokio::join!(session.connect_peer("bob"), peer);
    let conn = conn.unwrap();
    assert_eq!(
        session.peer("bob").and_then(|p| p.control()).map(|c| c.id()),
        Some(conn.id())
    );

    // The pierced socket now carries control messages.
    conn.send(&QueueUpload {
        filename: "@@a\\b.mp3".into(),
    })
    .await
    .unwrap();
    assert_eq!(read_queue_upload(&mut pierced).await.filename, "@@a\\b.mp3");

    // The token was used up: a second socket presenting it is dropped.
    let mut replay = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    replay
        .write_all(&PierceFirewall { token }.to_bytes().unwrap())
        .await
        .unwrap();
    assert_closed(&mut replay).await;
    assert_eq!(
        session.peer("bob").and_then(|p| p.control()).map(|c| c.id()),
        Some(conn.id())
    );
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn peer_dialling_in_first_wins_over_our_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = MockServer::start().await;
    let session = logged_in(&mut server, dir.path()).await;
    let bob_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bob_port = u32::from(bob_listener.local_addr().unwrap().port());

    let peer = async {
        server
            .expect_message::<GetPeerAddress>(|m| m.username == "bob")
            .await;
        // Bob reaches us before the server answers.
        let inbound = dial_session(session.local_port(), "bob", ConnectionType::Peer).await;
        eventually(|| session.peer("bob").is_some_and(|p| p.control().is_some())).await;
        let first = session.peer("bob").and_then(|p| p.control()).unwrap();
        server.send(&address("bob", Ipv4Addr::LOCALHOST, bob_port));
        (inbound, first)
    };

    let (conn, (mut inbound, first)) = tokio::join!(session.connect_peer("bob"), peer);
    let conn = conn.unwrap();
    assert_eq!(conn.id(), first.id());
    assert!(!first.is_closed());

    // No outbound socket was opened.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), bob_listener.accept())
            .await
            .is_err()
    );

    conn.send(&QueueUpload {
        filename: "x".into(),
    })
    .await
    .unwrap();
    assert_eq!(read_queue_upload(&mut inbound).await.filename, "x");
}

#[tokio::test]
async fn inbound_socket_ends_a_race_in_progress() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = MockServer::start().await;
    let session = logged_in(&mut server, dir.path()).await;
    let port = session.local_port();
    let gone = dead_port().await;

    let peer = async {
        server
            .expect_message::<GetPeerAddress>(|m| m.username == "bob")
            .await;
        server.send(&address("bob", Ipv4Addr::LOCALHOST, gone));
        let request = server
            .expect_message::<ConnectToPeer>(|m| m.username == "bob")
            .await;
        // The direct dial has nowhere to go and the pierce never comes;
        // bob introduces himself instead.
        let inbound = dial_session(port, "bob", ConnectionType::Peer).await;
        (inbound, request.token)
    };

    let (conn, (mut inbound, token)) = tokio::join!(session.connect_peer("bob"), peer);
    let conn = conn.unwrap();
    assert_eq!(
        session.peer("bob").and_then(|p| p.control()).map(|c| c.id()),
        Some(conn.id())
    );

    // The abandoned indirect attempt no longer accepts its token.
    let mut late = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    late.write_all(&PierceFirewall { token }.to_bytes().unwrap())
        .await
        .unwrap();
    assert_closed(&mut late).await;
    assert!(!conn.is_closed());

    conn.send(&QueueUpload {
        filename: "y".into(),
    })
    .await
    .unwrap();
    assert_eq!(read_queue_upload(&mut inbound).await.filename, "y");
}

#[tokio::test]
async fn server_request_is_answered_with_a_pierce() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = MockServer::start().await;
    let session = logged_in(&mut server, dir.path()).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = u32::from(listener.local_addr().unwrap().port());

    server.send(&ConnectToPeerResponse {
        username: "carol".into(),
        conn_type: ConnectionType::Peer,
        ip: Ipv4Addr::LOCALHOST,
        port,
        token: Token(77),
        privileged: true,
    });

    let (mut stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .unwrap()
        .unwrap();
    let frame = read_frame(&mut stream, CodeWidth::One)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(PierceFirewall::from_frame(&frame).unwrap().token, Token(77));

    eventually(|| session.peer("carol").is_some_and(|p| p.control().is_some())).await;
    assert!(session.peer("carol").unwrap().info().privileged);
}

#[tokio::test]
async fn failed_server_request_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = MockServer::start().await;
    let _session = logged_in(&mut server, dir.path()).await;

    server.send(&ConnectToPeerResponse {
        username: "dave".into(),
        conn_type: ConnectionType::Peer,
        ip: Ipv4Addr::LOCALHOST,
        port: dead_port().await,
        token: Token(78),
        privileged: false,
    });

    let report = server
        .expect_message::<CantConnectToPeer>(|m| m.token == Token(78))
        .await;
    assert_eq!(report.username, "dave");
}
