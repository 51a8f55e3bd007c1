//! Error types for the client.

use slsk_data_channel::DataChannelError;
use slsk_protocol::{LoginRejection, ProtocolError, TransferRejection};

/// Errors produced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("file transfer error: {0}")]
    DataChannel(#[from] DataChannelError),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("cancelled")]
    Cancelled,

    #[error("connection closed")]
    Closed,

    /// The directory server could not be reached. Fatal at startup.
    #[error("cannot connect to server {addr}: {source}")]
    ServerConnect {
        addr: String,
        source: std::io::Error,
    },

    /// The listening port could not be bound. Fatal at startup.
    #[error("cannot listen on port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("login rejected: {0}")]
    LoginRejected(LoginRejection),

    /// The server accepted the credentials but some post-login replies
    /// never arrived.
    #[error("login incomplete, missing: {0}")]
    LoginIncomplete(String),

    #[error("already logged in")]
    AlreadyLoggedIn,

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("no control socket for peer {0}")]
    NoControlSocket(String),

    #[error("transfer rejected: {0}")]
    TransferRejected(TransferRejection),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
}

impl ClientError {
    /// Returns `true` if retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LoginRejected(r) => r.is_retryable(),
            Self::TransferRejected(r) => r.is_retryable(),
            Self::Timeout(_) | Self::PeerUnreachable(_) | Self::NoControlSocket(_) => true,
            _ => false,
        }
    }
}
