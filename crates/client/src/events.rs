//! Values published through the session notifier besides raw messages.

use slsk_protocol::Token;

/// A message decoded from a peer's control socket, tagged with the peer.
#[derive(Debug, Clone, PartialEq)]
pub struct FromPeer<M> {
    pub username: String,
    pub message: M,
}

/// Where a download stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    /// `QueueUpload` sent, waiting for the peer's transfer request.
    Queued,
    /// Transfer request accepted, waiting for the file socket.
    Accepted,
    /// Bytes are flowing.
    Streaming,
    Complete { bytes: u64 },
    Failed { reason: String },
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed { .. })
    }
}

/// Progress of one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    pub token: Token,
    pub username: String,
    pub filename: String,
    pub state: DownloadState,
}
