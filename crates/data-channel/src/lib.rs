//! Raw file-data sockets.
//!
//! Once a transfer has been negotiated over a peer's control socket, the
//! bytes travel on a separate socket opened with `PeerInit` type `"F"`.
//! That socket carries no frames: a token, a resume offset, then the file.
//!
//! # Wire format
//!
//! See [`wire`] module for the preamble.

pub mod error;
pub mod receive;
pub mod send;
pub mod wire;

pub use error::DataChannelError;
pub use receive::{local_file_name, receive_file};
pub use send::send_file;

/// Read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;
