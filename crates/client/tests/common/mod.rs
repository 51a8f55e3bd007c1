//! Loopback stand-ins for the directory server and remote peers.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use slsk_client::ClientConfig;
use slsk_protocol::messages::init::PeerInit;
use slsk_protocol::messages::server::{
    CheckPrivilegesResponse, ExcludedSearchPhrases, Login, LoginResponse, ParentMinSpeed,
    ParentSpeedRatio, PrivilegedUsers, RoomList, WatchUserResponse, WishlistInterval,
};
use slsk_protocol::{
    CodeWidth, ConnectionType, Frame, LoginRejection, Message, Room, Token, UserStats,
    UserStatus, read_frame,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// How the mock server answers a login.
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    pub reject: Option<LoginRejection>,
    pub skip_privileges: bool,
}

/// A directory server that accepts one client.
///
/// Every frame the client sends is recorded; `Login` is answered with a
/// greeting and the eight post-login messages.
pub struct MockServer {
    pub addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Frame>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::with(MockOptions::default()).await
    }

    pub async fn with(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (outbox, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let replies = outbox.clone();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut rd, mut wr) = stream.into_split();

            tokio::spawn(async move {
                while let Some(bytes) = out_rx.recv().await {
                    if wr.write_all(&bytes).await.is_err() {
                        break;
                    }
                }
            });

            while let Ok(Some(frame)) = read_frame(&mut rd, CodeWidth::Four).await {
                if frame.code == Login::CODE {
                    let login = Login::from_frame(&frame).unwrap();
                    for bytes in login_replies(&login.username, &options) {
                        let _ = replies.send(bytes);
                    }
                }
                if frames_tx.send(frame).is_err() {
                    break;
                }
            }
        });

        Self {
            addr,
            frames,
            outbox,
        }
    }

    /// Next frame the client sent.
    pub async fn next_frame(&mut self) -> Frame {
        tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client disconnected")
    }

    /// Skips frames until one with `code` arrives.
    pub async fn expect_frame(&mut self, code: u32) -> Frame {
        loop {
            let frame = self.next_frame().await;
            if frame.code == code {
                return frame;
            }
        }
    }

    /// Skips frames until `pred` accepts a decoded `M`.
    pub async fn expect_message<M: Message>(&mut self, pred: impl Fn(&M) -> bool) -> M {
        loop {
            let frame = self.expect_frame(M::CODE).await;
            let msg = M::from_frame(&frame).unwrap();
            if pred(&msg) {
                return msg;
            }
        }
    }

    /// Consumes the login request and the nine announcements after it.
    pub async fn drain_login(&mut self) {
        self.expect_frame(Login::CODE).await;
        for _ in 0..9 {
            self.next_frame().await;
        }
    }

    pub fn send<M: Message>(&self, msg: &M) {
        self.outbox.send(msg.to_bytes().unwrap()).unwrap();
    }
}

fn login_replies(username: &str, options: &MockOptions) -> Vec<Vec<u8>> {
    if let Some(reason) = &options.reject {
        let failure = LoginResponse::Failure {
            reason: reason.clone(),
        };
        return vec![failure.to_bytes().unwrap()];
    }

    let mut out = vec![
        LoginResponse::Success {
            greeting: "hello".into(),
            own_ip: Ipv4Addr::LOCALHOST,
            password_hash: String::new(),
            is_supporter: false,
        }
        .to_bytes()
        .unwrap(),
        RoomList {
            rooms: vec![Room {
                name: "lobby".into(),
                users: 3,
            }],
        }
        .to_bytes()
        .unwrap(),
        ParentMinSpeed { speed: 1 }.to_bytes().unwrap(),
        ParentSpeedRatio { ratio: 50 }.to_bytes().unwrap(),
        WishlistInterval { seconds: 720 }.to_bytes().unwrap(),
        PrivilegedUsers {
            users: vec!["vip".into()],
        }
        .to_bytes()
        .unwrap(),
        ExcludedSearchPhrases { phrases: vec![] }.to_bytes().unwrap(),
        WatchUserResponse {
            username: username.to_owned(),
            exists: true,
            status: UserStatus::Online,
            stats: UserStats {
                avg_speed: 100,
                upload_count: 0,
                files: 10,
                dirs: 2,
            },
            country: None,
        }
        .to_bytes()
        .unwrap(),
    ];
    if !options.skip_privileges {
        out.push(CheckPrivilegesResponse { time_left: 0 }.to_bytes().unwrap());
    }
    out
}

pub fn config(server: &MockServer, username: &str, download_dir: &Path) -> ClientConfig {
    ClientConfig {
        server_addr: server.addr.to_string(),
        listen_port: 0,
        username: username.into(),
        password: "p1".into(),
        download_dir: download_dir.to_path_buf(),
        ..ClientConfig::default()
    }
}

/// Opens a socket to the session's listener and introduces `username`.
pub async fn dial_session(port: u16, username: &str, conn_type: ConnectionType) -> TcpStream {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let init = PeerInit {
        username: username.into(),
        conn_type,
        token: Token(0),
    };
    stream.write_all(&init.to_bytes().unwrap()).await.unwrap();
    stream
}

/// Polls `cond` until it holds or [`WAIT`] elapses.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
