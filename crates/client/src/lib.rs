//! Soulseek client core.
//!
//! A [`Session`] owns the directory-server connection and the peer
//! listener. Everything else hangs off it: peer control sockets obtained
//! directly or through the server (firewall traversal), our place in the
//! distributed search tree, searches and downloads. Decoded messages are
//! published through a typed [`Notifier`](slsk_notify::Notifier) that
//! callers can subscribe to as well.
//!
//! ```no_run
//! # async fn run() -> Result<(), slsk_client::ClientError> {
//! use slsk_client::{ClientConfig, Session};
//!
//! let config = ClientConfig {
//!     username: "me".into(),
//!     password: "secret".into(),
//!     ..ClientConfig::default()
//! };
//! let session = Session::connect(config).await?;
//! session.login().await?;
//! let mut search = session.search(session.next_token(), "some album").await?;
//! while let Some(result) = search.recv().await {
//!     println!("{} has {} files", result.username, result.files.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod config;
pub mod connection;
mod context;
pub mod dispatch;
pub mod distributed;
mod download;
pub mod error;
pub mod events;
mod files;
mod login;
mod multiplexer;
pub mod peer;
pub mod search;
mod session;
mod traversal;

pub use config::ClientConfig;
pub use connection::{Connection, FrameHandler, Sender, spawn_connection};
pub use dispatch::Dispatcher;
pub use distributed::{DistributedNode, DistributedState};
pub use download::DownloadRequest;
pub use error::ClientError;
pub use events::{DownloadEvent, DownloadState, FromPeer};
pub use login::LoginOutcome;
pub use peer::{Peer, PeerInfo};
pub use search::Search;
pub use session::Session;
