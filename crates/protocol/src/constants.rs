use std::time::Duration;

/// Largest frame accepted from any socket (64 MB).
///
/// Shared file lists of very large collections are the biggest
/// legitimate messages; anything beyond this is treated as garbage.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Client version announced at login.
pub const CLIENT_VERSION: u32 = 160;

/// Minor client version announced at login.
pub const CLIENT_MINOR_VERSION: u32 = 1;

/// Default directory server address.
pub const DEFAULT_SERVER_ADDR: &str = "server.slsknet.org:2242";

/// Default port for incoming peer connections.
pub const DEFAULT_LISTEN_PORT: u16 = 2234;

/// Default deadline for delivering one decoded notification.
pub const DELIVERY_DEADLINE: Duration = Duration::from_secs(3);

/// Default deadline for waiting on login replies.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period before assuming no privileges when the server never
/// answers the privilege check.
pub const PRIVILEGES_GRACE: Duration = Duration::from_secs(2);

/// Width of the message code that follows the length prefix.
///
/// Directory-server and peer control sockets use 4-byte codes; the
/// connection handshake and the distributed relay use a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeWidth {
    One,
    Four,
}

impl CodeWidth {
    /// Number of bytes occupied by the code field.
    pub const fn len(self) -> usize {
        match self {
            CodeWidth::One => 1,
            CodeWidth::Four => 4,
        }
    }
}

/// Role a peer socket serves once its handshake is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Control socket (`"P"`): searches, listings, transfer negotiation.
    Peer,
    /// File-data socket (`"F"`): raw byte stream.
    File,
    /// Distributed relay socket (`"D"`).
    Distributed,
}

impl ConnectionType {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionType::Peer => "P",
            ConnectionType::File => "F",
            ConnectionType::Distributed => "D",
        }
    }

    /// Parses the wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "P" => Some(ConnectionType::Peer),
            "F" => Some(ConnectionType::File),
            "D" => Some(ConnectionType::Distributed),
            _ => None,
        }
    }

    /// Code width used by frames on a socket of this type.
    ///
    /// File sockets carry no frames after the handshake; `None`.
    pub const fn code_width(self) -> Option<CodeWidth> {
        match self {
            ConnectionType::Peer => Some(CodeWidth::Four),
            ConnectionType::Distributed => Some(CodeWidth::One),
            ConnectionType::File => None,
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
