mod common;

use std::time::Duration;

use common::{MockServer, WAIT, config, dial_session, eventually};
use slsk_client::Session;
use slsk_protocol::messages::peer::FileSearchResponse;
use slsk_protocol::messages::server::FileSearch;
use slsk_protocol::{ConnectionType, FileAttribute, FileEntry, Message, Token};
use tokio::io::AsyncWriteExt;

fn result(username: &str, token: Token, filename: &str) -> FileSearchResponse {
    FileSearchResponse {
        username: username.into(),
        token,
        files: vec![FileEntry {
            filename: filename.into(),
            size: 4096,
            extension: "flac".into(),
            attributes: vec![FileAttribute {
                kind: 1,
                value: 240,
            }],
        }],
        slot_free: true,
        avg_speed: 1000,
        queue_length: 0,
        private_files: vec![],
    }
}

#[tokio::test]
async fn results_reach_the_search_with_their_token() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = MockServer::start().await;
    let session = Session::connect(config(&server, "u1", dir.path()))
        .await
        .unwrap();
    session.login().await.unwrap();
    server.drain_login().await;

    let (first_token, second_token) = (session.next_token(), session.next_token());
    let mut first = session.search(first_token, "blue train").await.unwrap();
    let mut second = session.search(second_token, "kind of blue").await.unwrap();

    let sent = server
        .expect_message::<FileSearch>(|m| m.token == first_token)
        .await;
    assert_eq!(sent.query, "blue train");
    server
        .expect_message::<FileSearch>(|m| m.token == second_token)
        .await;

    let mut bob = dial_session(session.local_port(), "bob", ConnectionType::Peer).await;
    eventually(|| session.peer("bob").is_some_and(|p| p.control().is_some())).await;

    // Interleaved, plus one for a search nobody made.
    for r in [
        result("bob", Token(9_999_999), "stray.flac"),
        result("bob", second_token, "@@jazz\\So What.flac"),
        result("bob", first_token, "@@jazz\\Blue Train.flac"),
    ] {
        bob.write_all(&r.to_bytes().unwrap()).await.unwrap();
    }

    let got = tokio::time::timeout(WAIT, first.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.token, first_token);
    assert_eq!(got.files[0].filename, "@@jazz\\Blue Train.flac");

    let got = tokio::time::timeout(WAIT, second.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.token, second_token);
    assert_eq!(got.username, "bob");

    assert!(first.try_recv().is_none());
    assert!(second.try_recv().is_none());

    // A dropped search stops receiving; the other keeps going.
    drop(first);
    bob.write_all(&result("bob", first_token, "late.flac").to_bytes().unwrap())
        .await
        .unwrap();
    bob.write_all(&result("bob", second_token, "more.flac").to_bytes().unwrap())
        .await
        .unwrap();
    let got = tokio::time::timeout(WAIT, second.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.files[0].filename, "more.flac");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(second.try_recv().is_none());
}
