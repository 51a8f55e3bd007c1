//! Error types for the data channel.

/// Errors produced on a file-data socket.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sender closed the socket cleanly before the full size arrived.
    #[error("transfer incomplete: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("invalid file path: {0}")]
    InvalidPath(String),

    #[error("transfer timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),
}
