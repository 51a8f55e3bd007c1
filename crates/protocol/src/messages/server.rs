//! Directory-server messages (4-byte codes).
//!
//! Where the same code is used in both directions with different payloads,
//! the outbound form keeps the plain name and the inbound form carries a
//! `Response` suffix.

use std::net::Ipv4Addr;

use md5::{Digest, Md5};

use super::{Message, empty_message};
use crate::constants::{CLIENT_MINOR_VERSION, CLIENT_VERSION, CodeWidth, ConnectionType};
use crate::error::ProtocolError;
use crate::token::Token;
use crate::types::{LoginRejection, ParentCandidate, Room, UserStats, UserStatus};
use crate::wire::{Reader, Writer};

const W: CodeWidth = CodeWidth::Four;

fn conn_type(r: &mut Reader<'_>) -> Result<ConnectionType, ProtocolError> {
    let raw = r.string()?;
    ConnectionType::parse(&raw)
        .ok_or_else(|| ProtocolError::invalid("connection type", format!("unknown type {raw:?}")))
}

// --- Login -----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub password: String,
    pub version: u32,
    pub minor_version: u32,
}

impl Login {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            version: CLIENT_VERSION,
            minor_version: CLIENT_MINOR_VERSION,
        }
    }

    /// Hex MD5 of username followed by password.
    pub fn hash(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.username.as_bytes());
        hasher.update(self.password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Message for Login {
    const CODE: u32 = 1;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username)
            .str(&self.password)
            .u32(self.version)
            .str(&self.hash())
            .u32(self.minor_version);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let username = r.string()?;
        let password = r.string()?;
        let version = r.u32()?;
        let _hash = r.string()?;
        let minor_version = r.u32()?;
        Ok(Self {
            username,
            password,
            version,
            minor_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResponse {
    Success {
        greeting: String,
        own_ip: Ipv4Addr,
        password_hash: String,
        is_supporter: bool,
    },
    Failure {
        reason: LoginRejection,
    },
}

impl Message for LoginResponse {
    const CODE: u32 = 1;
    const WIDTH: CodeWidth = W;
    const LENIENT: bool = true;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        match self {
            LoginResponse::Success {
                greeting,
                own_ip,
                password_hash,
                is_supporter,
            } => {
                w.bool(true)
                    .str(greeting)
                    .ip(*own_ip)
                    .str(password_hash)
                    .bool(*is_supporter);
            }
            LoginResponse::Failure { reason } => {
                w.bool(false).str(reason.as_wire());
            }
        }
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        if !r.bool()? {
            let reason = LoginRejection::from_wire(&r.string()?);
            return Ok(LoginResponse::Failure { reason });
        }
        let greeting = r.string()?;
        let own_ip = r.ip()?;
        // Older servers stop after the address.
        let password_hash = if r.is_empty() { String::new() } else { r.string()? };
        let is_supporter = if r.is_empty() { false } else { r.bool()? };
        Ok(LoginResponse::Success {
            greeting,
            own_ip,
            password_hash,
            is_supporter,
        })
    }
}

// --- Simple announcements --------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetWaitPort {
    pub port: u32,
}

impl Message for SetWaitPort {
    const CODE: u32 = 2;
    const WIDTH: CodeWidth = W;
    const LENIENT: bool = true;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.port);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { port: r.u32()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetStatus {
    pub status: UserStatus,
}

impl Message for SetStatus {
    const CODE: u32 = 28;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.i32(self.status.to_wire() as i32);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let raw = r.i32()?;
        Ok(Self {
            status: UserStatus::from_wire(raw.max(0) as u32)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedFoldersFiles {
    pub folders: u32,
    pub files: u32,
}

impl Message for SharedFoldersFiles {
    const CODE: u32 = 35;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.folders).u32(self.files);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            folders: r.u32()?,
            files: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaveNoParent {
    pub no_parent: bool,
}

impl Message for HaveNoParent {
    const CODE: u32 = 71;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.bool(self.no_parent);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            no_parent: r.bool()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptChildren {
    pub accept: bool,
}

impl Message for AcceptChildren {
    const CODE: u32 = 100;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.bool(self.accept);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { accept: r.bool()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchLevel {
    pub level: u32,
}

impl Message for BranchLevel {
    const CODE: u32 = 126;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.level);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { level: r.u32()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRoot {
    pub root: String,
}

impl Message for BranchRoot {
    const CODE: u32 = 127;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.root);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { root: r.string()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPrivileges;

empty_message!(CheckPrivileges, 92, CodeWidth::Four);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPrivilegesResponse {
    /// Seconds of privileges left; zero when unprivileged.
    pub time_left: u32,
}

impl Message for CheckPrivilegesResponse {
    const CODE: u32 = 92;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.time_left);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            time_left: r.u32()?,
        })
    }
}

// --- User lookups ----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPeerAddress {
    pub username: String,
}

impl Message for GetPeerAddress {
    const CODE: u32 = 3;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPeerAddressResponse {
    pub username: String,
    pub ip: Ipv4Addr,
    pub port: u32,
}

impl GetPeerAddressResponse {
    /// The server reports unknown or offline users as `0.0.0.0:0`.
    pub fn socket_addr(&self) -> Option<std::net::SocketAddr> {
        if self.ip.is_unspecified() || self.port == 0 {
            return None;
        }
        let port = u16::try_from(self.port).ok()?;
        Some(std::net::SocketAddr::from((self.ip, port)))
    }
}

impl Message for GetPeerAddressResponse {
    const CODE: u32 = 3;
    const WIDTH: CodeWidth = W;
    const LENIENT: bool = true;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username).ip(self.ip).u32(self.port);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.string()?,
            ip: r.ip()?,
            port: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchUser {
    pub username: String,
}

impl Message for WatchUser {
    const CODE: u32 = 5;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchUserResponse {
    pub username: String,
    pub exists: bool,
    pub status: UserStatus,
    pub stats: UserStats,
    pub country: Option<String>,
}

impl Message for WatchUserResponse {
    const CODE: u32 = 5;
    const WIDTH: CodeWidth = W;
    const LENIENT: bool = true;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username).bool(self.exists);
        if self.exists {
            w.u32(self.status.to_wire());
            self.stats.encode(w);
            if let Some(country) = &self.country {
                w.str(country);
            }
        }
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let username = r.string()?;
        let exists = r.bool()?;
        if !exists {
            return Ok(Self {
                username,
                exists,
                status: UserStatus::Offline,
                stats: UserStats::default(),
                country: None,
            });
        }
        let status = UserStatus::from_wire(r.u32()?)?;
        let stats = UserStats::decode(r)?;
        let country = if r.is_empty() { None } else { Some(r.string()?) };
        Ok(Self {
            username,
            exists,
            status,
            stats,
            country,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserStatus {
    pub username: String,
}

impl Message for GetUserStatus {
    const CODE: u32 = 7;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserStatusResponse {
    pub username: String,
    pub status: UserStatus,
    pub privileged: bool,
}

impl Message for GetUserStatusResponse {
    const CODE: u32 = 7;
    const WIDTH: CodeWidth = W;
    const LENIENT: bool = true;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username)
            .u32(self.status.to_wire())
            .bool(self.privileged);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let username = r.string()?;
        let status = UserStatus::from_wire(r.u32()?)?;
        let privileged = if r.is_empty() { false } else { r.bool()? };
        Ok(Self {
            username,
            status,
            privileged,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserStats {
    pub username: String,
}

impl Message for GetUserStats {
    const CODE: u32 = 36;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUserStatsResponse {
    pub username: String,
    pub stats: UserStats,
}

impl Message for GetUserStatsResponse {
    const CODE: u32 = 36;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username);
        self.stats.encode(w);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.string()?,
            stats: UserStats::decode(r)?,
        })
    }
}

// --- Indirect connections --------------------------------------------------

/// Asks the server to tell `username` to connect to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectToPeer {
    pub token: Token,
    pub username: String,
    pub conn_type: ConnectionType,
}

impl Message for ConnectToPeer {
    const CODE: u32 = 18;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.token.get())
            .str(&self.username)
            .str(self.conn_type.as_str());
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            token: Token(r.u32()?),
            username: r.string()?,
            conn_type: conn_type(r)?,
        })
    }
}

/// The server relays a peer's request that we connect to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectToPeerResponse {
    pub username: String,
    pub conn_type: ConnectionType,
    pub ip: Ipv4Addr,
    pub port: u32,
    pub token: Token,
    pub privileged: bool,
}

impl ConnectToPeerResponse {
    pub fn socket_addr(&self) -> Option<std::net::SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        Some(std::net::SocketAddr::from((self.ip, port)))
    }
}

impl Message for ConnectToPeerResponse {
    const CODE: u32 = 18;
    const WIDTH: CodeWidth = W;
    const LENIENT: bool = true;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username)
            .str(self.conn_type.as_str())
            .ip(self.ip)
            .u32(self.port)
            .u32(self.token.get())
            .bool(self.privileged);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let username = r.string()?;
        let conn_type = conn_type(r)?;
        let ip = r.ip()?;
        let port = r.u32()?;
        let token = Token(r.u32()?);
        let privileged = if r.is_empty() { false } else { r.bool()? };
        Ok(Self {
            username,
            conn_type,
            ip,
            port,
            token,
            privileged,
        })
    }
}

/// Tells the server an indirect connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CantConnectToPeer {
    pub token: Token,
    pub username: String,
}

impl Message for CantConnectToPeer {
    const CODE: u32 = 1001;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.token.get()).str(&self.username);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            token: Token(r.u32()?),
            username: r.string()?,
        })
    }
}

/// The peer we asked to connect to us could not reach us either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CantConnectToPeerResponse {
    pub token: Token,
}

impl Message for CantConnectToPeerResponse {
    const CODE: u32 = 1001;
    const WIDTH: CodeWidth = W;
    const LENIENT: bool = true;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.token.get());
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            token: Token(r.u32()?),
        })
    }
}

// --- Search ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSearch {
    pub token: Token,
    pub query: String,
}

impl Message for FileSearch {
    const CODE: u32 = 26;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.token.get()).str(&self.query);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            token: Token(r.u32()?),
            query: r.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedSearchPhrases {
    pub phrases: Vec<String>,
}

impl Message for ExcludedSearchPhrases {
    const CODE: u32 = 160;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.list(&self.phrases, |w, p| {
            w.str(p);
        });
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            phrases: r.list(|r| r.string())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WishlistInterval {
    pub seconds: u32,
}

impl Message for WishlistInterval {
    const CODE: u32 = 104;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.seconds);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { seconds: r.u32()? })
    }
}

// --- Post-login announcements from the server ------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomList {
    pub rooms: Vec<Room>,
}

impl Message for RoomList {
    const CODE: u32 = 64;
    const WIDTH: CodeWidth = W;
    // Owned and operated private room lists follow; not tracked.
    const LENIENT: bool = true;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.list(&self.rooms, |w, room| {
            w.str(&room.name);
        });
        w.list(&self.rooms, |w, room| {
            w.u32(room.users);
        });
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let names = r.list(|r| r.string())?;
        let counts = r.list(|r| r.u32())?;
        if names.len() != counts.len() {
            return Err(ProtocolError::invalid(
                "room list",
                format!("{} names but {} user counts", names.len(), counts.len()),
            ));
        }
        let rooms = names
            .into_iter()
            .zip(counts)
            .map(|(name, users)| Room { name, users })
            .collect();
        Ok(Self { rooms })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedUsers {
    pub users: Vec<String>,
}

impl Message for PrivilegedUsers {
    const CODE: u32 = 69;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.list(&self.users, |w, u| {
            w.str(u);
        });
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            users: r.list(|r| r.string())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentMinSpeed {
    pub speed: u32,
}

impl Message for ParentMinSpeed {
    const CODE: u32 = 83;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.speed);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { speed: r.u32()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentSpeedRatio {
    pub ratio: u32,
}

impl Message for ParentSpeedRatio {
    const CODE: u32 = 84;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.ratio);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { ratio: r.u32()? })
    }
}

// --- Distributed network ---------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PossibleParents {
    pub parents: Vec<ParentCandidate>,
}

impl Message for PossibleParents {
    const CODE: u32 = 102;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.list(&self.parents, |w, p| {
            w.str(&p.username).ip(p.ip).u32(p.port);
        });
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let parents = r.list(|r| {
            Ok(ParentCandidate {
                username: r.string()?,
                ip: r.ip()?,
                port: r.u32()?,
            })
        })?;
        Ok(Self { parents })
    }
}

/// A distributed message the server hands to a branch root.
///
/// `payload` is the body of the inner distributed frame whose one-byte
/// code is `distributed_code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedMessage {
    pub distributed_code: u8,
    pub payload: Vec<u8>,
}

impl Message for EmbeddedMessage {
    const CODE: u32 = 93;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u8(self.distributed_code).raw(&self.payload);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            distributed_code: r.u8()?,
            payload: r.rest().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn login_hash_is_md5_of_user_and_password() {
        let login = Login::new("u1", "p1");
        assert_eq!(login.hash().len(), 32);
        assert_eq!(login.hash(), Login::new("u1", "p1").hash());
        assert_ne!(login.hash(), Login::new("u1", "p2").hash());
        assert_eq!(
            Login::new("", "").hash(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn login_roundtrip() {
        let login = Login::new("u1", "p1");
        let frame = login.to_frame().unwrap();
        assert_eq!(Login::from_frame(&frame).unwrap(), login);
    }

    #[test]
    fn login_response_failure() {
        let frame = LoginResponse::Failure {
            reason: LoginRejection::InvalidVersion,
        }
        .to_frame()
        .unwrap();
        let decoded = LoginResponse::from_frame(&frame).unwrap();
        assert_eq!(
            decoded,
            LoginResponse::Failure {
                reason: LoginRejection::InvalidVersion
            }
        );
    }

    #[test]
    fn login_response_from_older_server() {
        let mut w = Writer::new();
        w.bool(true).str("hello").ip(Ipv4Addr::new(1, 2, 3, 4));
        let frame = Frame::new(1, w.into_inner());
        match LoginResponse::from_frame(&frame).unwrap() {
            LoginResponse::Success {
                greeting,
                own_ip,
                password_hash,
                is_supporter,
            } => {
                assert_eq!(greeting, "hello");
                assert_eq!(own_ip, Ipv4Addr::new(1, 2, 3, 4));
                assert!(password_hash.is_empty());
                assert!(!is_supporter);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn peer_address_unknown_user() {
        let resp = GetPeerAddressResponse {
            username: "ghost".into(),
            ip: Ipv4Addr::UNSPECIFIED,
            port: 0,
        };
        assert!(resp.socket_addr().is_none());
    }

    #[test]
    fn connect_to_peer_rejects_unknown_type() {
        let mut w = Writer::new();
        w.u32(1).str("bob").str("Z");
        let frame = Frame::new(18, w.into_inner());
        assert!(matches!(
            ConnectToPeer::from_frame(&frame),
            Err(ProtocolError::InvalidField { .. })
        ));
    }

    #[test]
    fn room_list_mismatched_counts() {
        let mut w = Writer::new();
        w.u32(1).str("room").u32(0);
        let frame = Frame::new(64, w.into_inner());
        assert!(RoomList::from_frame(&frame).is_err());
    }

    #[test]
    fn strict_message_rejects_trailing_bytes() {
        let mut frame = BranchLevel { level: 3 }.to_frame().unwrap();
        frame.payload.push(0);
        assert!(matches!(
            BranchLevel::from_frame(&frame),
            Err(ProtocolError::TrailingBytes { code: 126, .. })
        ));
    }

    #[test]
    fn watch_user_missing_user() {
        let msg = WatchUserResponse {
            username: "gone".into(),
            exists: false,
            status: UserStatus::Offline,
            stats: UserStats::default(),
            country: None,
        };
        let frame = msg.to_frame().unwrap();
        assert_eq!(frame.payload.len(), 4 + 4 + 1);
        assert_eq!(WatchUserResponse::from_frame(&frame).unwrap(), msg);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn ip() -> impl Strategy<Value = Ipv4Addr> {
            any::<u32>().prop_map(Ipv4Addr::from)
        }

        fn status() -> impl Strategy<Value = UserStatus> {
            prop_oneof![
                Just(UserStatus::Offline),
                Just(UserStatus::Away),
                Just(UserStatus::Online)
            ]
        }

        fn stats() -> impl Strategy<Value = UserStats> {
            (any::<u32>(), any::<u32>(), any::<u32>(), any::<u32>()).prop_map(
                |(avg_speed, upload_count, files, dirs)| UserStats {
                    avg_speed,
                    upload_count,
                    files,
                    dirs,
                },
            )
        }

        fn conn_type() -> impl Strategy<Value = ConnectionType> {
            prop_oneof![
                Just(ConnectionType::Peer),
                Just(ConnectionType::File),
                Just(ConnectionType::Distributed)
            ]
        }

        fn roundtrip<M: Message + PartialEq + std::fmt::Debug>(msg: &M) -> Result<(), TestCaseError> {
            let frame = msg.to_frame().unwrap();
            prop_assert_eq!(&M::from_frame(&frame).unwrap(), msg);
            Ok(())
        }

        proptest! {
            #[test]
            fn prop_login(user in ".*", pass in ".*", version in any::<u32>(), minor in any::<u32>()) {
                roundtrip(&Login { username: user, password: pass, version, minor_version: minor })?;
            }

            #[test]
            fn prop_login_success(greeting in ".*", own_ip in ip(), hash in ".*", supporter in any::<bool>()) {
                roundtrip(&LoginResponse::Success {
                    greeting,
                    own_ip,
                    password_hash: hash,
                    is_supporter: supporter,
                })?;
            }

            #[test]
            fn prop_peer_address(username in ".*", ip in ip(), port in any::<u32>()) {
                roundtrip(&GetPeerAddressResponse { username, ip, port })?;
            }

            #[test]
            fn prop_watch_user(username in ".*", status in status(), stats in stats(), country in proptest::option::of("[A-Z]{2}")) {
                roundtrip(&WatchUserResponse { username, exists: true, status, stats, country })?;
            }

            #[test]
            fn prop_user_status(username in ".*", status in status(), privileged in any::<bool>()) {
                roundtrip(&GetUserStatusResponse { username, status, privileged })?;
            }

            #[test]
            fn prop_user_stats(username in ".*", stats in stats()) {
                roundtrip(&GetUserStatsResponse { username, stats })?;
            }

            #[test]
            fn prop_connect_to_peer(token in any::<u32>(), username in ".*", conn_type in conn_type()) {
                roundtrip(&ConnectToPeer { token: Token(token), username: username.clone(), conn_type })?;
                roundtrip(&CantConnectToPeer { token: Token(token), username })?;
            }

            #[test]
            fn prop_connect_to_peer_response(
                username in ".*",
                conn_type in conn_type(),
                ip in ip(),
                port in any::<u32>(),
                token in any::<u32>(),
                privileged in any::<bool>(),
            ) {
                roundtrip(&ConnectToPeerResponse { username, conn_type, ip, port, token: Token(token), privileged })?;
            }

            #[test]
            fn prop_file_search(token in any::<u32>(), query in ".*") {
                roundtrip(&FileSearch { token: Token(token), query })?;
            }

            #[test]
            fn prop_lists(rooms in proptest::collection::vec((".*", any::<u32>()), 0..8), users in proptest::collection::vec(".*", 0..8)) {
                let rooms = rooms.into_iter().map(|(name, users)| Room { name, users }).collect();
                roundtrip(&RoomList { rooms })?;
                roundtrip(&PrivilegedUsers { users: users.clone() })?;
                roundtrip(&ExcludedSearchPhrases { phrases: users })?;
            }

            #[test]
            fn prop_possible_parents(parents in proptest::collection::vec((".*", ip(), any::<u32>()), 0..8)) {
                let parents = parents
                    .into_iter()
                    .map(|(username, ip, port)| ParentCandidate { username, ip, port })
                    .collect();
                roundtrip(&PossibleParents { parents })?;
            }

            #[test]
            fn prop_embedded(code in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..256)) {
                roundtrip(&EmbeddedMessage { distributed_code: code, payload })?;
            }

            #[test]
            fn prop_scalars(n in any::<u32>(), b in any::<bool>(), root in ".*", status in status()) {
                roundtrip(&SetWaitPort { port: n })?;
                roundtrip(&SetStatus { status })?;
                roundtrip(&SharedFoldersFiles { folders: n, files: n / 2 })?;
                roundtrip(&HaveNoParent { no_parent: b })?;
                roundtrip(&AcceptChildren { accept: b })?;
                roundtrip(&BranchLevel { level: n })?;
                roundtrip(&BranchRoot { root })?;
                roundtrip(&CheckPrivilegesResponse { time_left: n })?;
                roundtrip(&ParentMinSpeed { speed: n })?;
                roundtrip(&ParentSpeedRatio { ratio: n })?;
                roundtrip(&WishlistInterval { seconds: n })?;
            }
        }
    }
}
