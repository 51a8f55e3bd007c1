//! Wire protocol for the Soulseek peer-to-peer network.
//!
//! Every socket except the raw file-data socket carries length-prefixed
//! frames. The code width depends on the socket role: directory-server and
//! peer control sockets use 4-byte codes, the handshake frame and the
//! distributed relay use a single byte.
//!
//! # Wire format
//!
//! See [`frame`] for framing and [`wire`] for field primitives.

pub mod compress;
pub mod constants;
pub mod error;
pub mod frame;
pub mod messages;
pub mod token;
pub mod types;
pub mod wire;

// Re-export primary types for convenience.
pub use constants::{CodeWidth, ConnectionType};
pub use error::ProtocolError;
pub use frame::{Frame, decode_frame, encode_frame, read_frame, write_frame};
pub use messages::Message;
pub use token::{Token, TokenGenerator};
pub use types::{
    FileAttribute, FileEntry, Folder, LoginRejection, ParentCandidate, Room, TransferDirection,
    TransferRejection, UserStats, UserStatus,
};
