use std::net::Ipv4Addr;

use crate::error::ProtocolError;
use crate::wire::{Reader, Writer};

/// Presence reported by the directory server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UserStatus {
    #[default]
    Offline,
    Away,
    Online,
}

impl UserStatus {
    pub fn to_wire(self) -> u32 {
        match self {
            UserStatus::Offline => 0,
            UserStatus::Away => 1,
            UserStatus::Online => 2,
        }
    }

    pub fn from_wire(v: u32) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(UserStatus::Offline),
            1 => Ok(UserStatus::Away),
            2 => Ok(UserStatus::Online),
            other => Err(ProtocolError::invalid("status", format!("unknown value {other}"))),
        }
    }
}

/// Transfer statistics the server keeps per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserStats {
    pub avg_speed: u32,
    pub upload_count: u32,
    pub files: u32,
    pub dirs: u32,
}

impl UserStats {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.u32(self.avg_speed)
            .u32(self.upload_count)
            .u32(0)
            .u32(self.files)
            .u32(self.dirs);
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let avg_speed = r.u32()?;
        let upload_count = r.u32()?;
        let _unknown = r.u32()?;
        let files = r.u32()?;
        let dirs = r.u32()?;
        Ok(Self {
            avg_speed,
            upload_count,
            files,
            dirs,
        })
    }
}

/// Which side a transfer request describes, from the sender's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// The sender wants to download from us.
    Download,
    /// The sender is ready to upload to us.
    Upload,
}

impl TransferDirection {
    pub fn to_wire(self) -> u32 {
        match self {
            TransferDirection::Download => 0,
            TransferDirection::Upload => 1,
        }
    }

    pub fn from_wire(v: u32) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(TransferDirection::Download),
            1 => Ok(TransferDirection::Upload),
            other => Err(ProtocolError::invalid(
                "direction",
                format!("unknown value {other}"),
            )),
        }
    }
}

/// Reason the server gives for refusing a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRejection {
    InvalidUsername,
    InvalidPassword,
    InvalidVersion,
    ServerFull,
    Other(String),
}

impl LoginRejection {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "INVALIDUSERNAME" => LoginRejection::InvalidUsername,
            "INVALIDPASS" => LoginRejection::InvalidPassword,
            "INVALIDVERSION" => LoginRejection::InvalidVersion,
            "SVRFULL" => LoginRejection::ServerFull,
            other => LoginRejection::Other(other.to_owned()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            LoginRejection::InvalidUsername => "INVALIDUSERNAME",
            LoginRejection::InvalidPassword => "INVALIDPASS",
            LoginRejection::InvalidVersion => "INVALIDVERSION",
            LoginRejection::ServerFull => "SVRFULL",
            LoginRejection::Other(s) => s,
        }
    }

    /// A full server may accept the same credentials later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoginRejection::ServerFull)
    }
}

impl std::fmt::Display for LoginRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoginRejection::InvalidUsername => f.write_str("invalid username"),
            LoginRejection::InvalidPassword => f.write_str("invalid password"),
            LoginRejection::InvalidVersion => f.write_str("client version rejected"),
            LoginRejection::ServerFull => f.write_str("server full"),
            LoginRejection::Other(s) => f.write_str(s),
        }
    }
}

/// Reason a peer refuses or aborts a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferRejection {
    Banned,
    Queued,
    FileNotShared,
    FileReadError,
    TooManyFiles,
    TooManyMegabytes,
    PendingShutdown,
    Cancelled,
    DisallowedExtension,
    Other(String),
}

impl TransferRejection {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "Banned" => TransferRejection::Banned,
            "Queued" => TransferRejection::Queued,
            "File not shared." | "File not shared" => TransferRejection::FileNotShared,
            "File read error." => TransferRejection::FileReadError,
            "Too many files" => TransferRejection::TooManyFiles,
            "Too many megabytes" => TransferRejection::TooManyMegabytes,
            "Pending shutdown." => TransferRejection::PendingShutdown,
            "Cancelled" => TransferRejection::Cancelled,
            "Disallowed extension" => TransferRejection::DisallowedExtension,
            other => TransferRejection::Other(other.to_owned()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            TransferRejection::Banned => "Banned",
            TransferRejection::Queued => "Queued",
            TransferRejection::FileNotShared => "File not shared.",
            TransferRejection::FileReadError => "File read error.",
            TransferRejection::TooManyFiles => "Too many files",
            TransferRejection::TooManyMegabytes => "Too many megabytes",
            TransferRejection::PendingShutdown => "Pending shutdown.",
            TransferRejection::Cancelled => "Cancelled",
            TransferRejection::DisallowedExtension => "Disallowed extension",
            TransferRejection::Other(s) => s,
        }
    }

    /// Whether asking again later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferRejection::Queued
                | TransferRejection::TooManyFiles
                | TransferRejection::TooManyMegabytes
                | TransferRejection::PendingShutdown
                | TransferRejection::FileReadError
        )
    }
}

impl std::fmt::Display for TransferRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One attribute of a shared file (bitrate, duration, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttribute {
    pub kind: u32,
    pub value: u32,
}

/// A shared file as it appears in listings and search responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub filename: String,
    pub size: u64,
    pub extension: String,
    pub attributes: Vec<FileAttribute>,
}

impl FileEntry {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.u8(1)
            .str(&self.filename)
            .u64(self.size)
            .str(&self.extension)
            .list(&self.attributes, |w, a| {
                w.u32(a.kind).u32(a.value);
            });
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let _code = r.u8()?;
        let filename = r.string()?;
        let size = r.u64()?;
        let extension = r.string()?;
        let attributes = r.list(|r| {
            Ok(FileAttribute {
                kind: r.u32()?,
                value: r.u32()?,
            })
        })?;
        Ok(Self {
            filename,
            size,
            extension,
            attributes,
        })
    }

    /// Search responses must not advertise nameless or empty files.
    pub(crate) fn validate_for_search(&self) -> Result<(), ProtocolError> {
        if self.filename.is_empty() {
            return Err(ProtocolError::invalid("filename", "empty"));
        }
        if self.size == 0 {
            return Err(ProtocolError::invalid(
                "size",
                format!("zero size for {}", self.filename),
            ));
        }
        Ok(())
    }
}

/// A directory and its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub path: String,
    pub files: Vec<FileEntry>,
}

impl Folder {
    pub(crate) fn encode(&self, w: &mut Writer) {
        w.str(&self.path).list(&self.files, |w, f| f.encode(w));
    }

    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            path: r.string()?,
            files: r.list(FileEntry::decode)?,
        })
    }
}

/// A chat room and its user count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub name: String,
    pub users: u32,
}

/// A peer the server suggests as distributed parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentCandidate {
    pub username: String,
    pub ip: Ipv4Addr,
    pub port: u32,
}

impl ParentCandidate {
    pub fn socket_addr(&self) -> Option<std::net::SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        Some(std::net::SocketAddr::from((self.ip, port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_rejection_wire_mapping() {
        for r in [
            TransferRejection::Banned,
            TransferRejection::Queued,
            TransferRejection::FileNotShared,
            TransferRejection::FileReadError,
            TransferRejection::TooManyFiles,
            TransferRejection::TooManyMegabytes,
            TransferRejection::PendingShutdown,
            TransferRejection::Cancelled,
            TransferRejection::DisallowedExtension,
        ] {
            assert_eq!(TransferRejection::from_wire(r.as_wire()), r);
        }
        assert_eq!(
            TransferRejection::from_wire("Remote file error"),
            TransferRejection::Other("Remote file error".into())
        );
    }

    #[test]
    fn retryable_rejections() {
        assert!(TransferRejection::Queued.is_retryable());
        assert!(!TransferRejection::Banned.is_retryable());
        assert!(!TransferRejection::FileNotShared.is_retryable());
        assert!(LoginRejection::ServerFull.is_retryable());
        assert!(!LoginRejection::InvalidPassword.is_retryable());
    }

    #[test]
    fn login_rejection_mapping() {
        assert_eq!(
            LoginRejection::from_wire("INVALIDPASS"),
            LoginRejection::InvalidPassword
        );
        assert_eq!(LoginRejection::InvalidVersion.as_wire(), "INVALIDVERSION");
    }

    #[test]
    fn status_values() {
        assert_eq!(UserStatus::from_wire(2).unwrap(), UserStatus::Online);
        assert!(UserStatus::from_wire(9).is_err());
    }

    #[test]
    fn parent_candidate_addr() {
        let c = ParentCandidate {
            username: "b".into(),
            ip: Ipv4Addr::LOCALHOST,
            port: 2234,
        };
        assert_eq!(c.socket_addr().unwrap().port(), 2234);

        let bad = ParentCandidate { port: 70_000, ..c };
        assert!(bad.socket_addr().is_none());
    }
}
