//! Error types for frame and message decoding.

/// Errors produced while framing or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket ended before the declared frame length was read.
    #[error("short frame: expected {expected} bytes, got {got}")]
    ShortFrame { expected: usize, got: usize },

    /// The declared length cannot hold the code field, or a field read
    /// would run past the end of the frame.
    #[error("size mismatch: frame declares {declared} bytes, needed {needed}")]
    SizeMismatch { declared: usize, needed: usize },

    /// A decoder was handed a frame carrying a different message code.
    #[error("code mismatch: expected {expected}, got {got}")]
    CodeMismatch { expected: u32, got: u32 },

    /// The decoder finished with unconsumed payload bytes.
    #[error("{remaining} trailing bytes after message {code}")]
    TrailingBytes { code: u32, remaining: usize },

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("invalid field {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("zlib stream error: {0}")]
    Decompress(std::io::Error),
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::InvalidField`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that mean the byte stream itself is
    /// unusable (as opposed to a single bad message).
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ShortFrame { .. } | Self::FrameTooLarge(_)
        )
    }
}
