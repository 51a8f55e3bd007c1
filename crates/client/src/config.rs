//! Client configuration.
//!
//! Every field has a serde default so a partial JSON document (or an empty
//! one) yields a usable configuration. Timeouts are stored in milliseconds
//! and exposed as [`Duration`]s.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slsk_protocol::constants::{
    CLIENT_MINOR_VERSION, CLIENT_VERSION, DEFAULT_LISTEN_PORT, DEFAULT_SERVER_ADDR,
};

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Directory server, `host:port`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Port for incoming peer connections (0 = OS-assigned).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Shared folder count advertised at login.
    #[serde(default)]
    pub shared_folders: u32,

    /// Shared file count advertised at login.
    #[serde(default)]
    pub shared_files: u32,

    #[serde(default = "default_client_version")]
    pub client_version: u32,

    #[serde(default = "default_minor_version")]
    pub minor_version: u32,

    /// Deadline for one notification delivery or one request/reply pair.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// Deadline for the whole post-login reply collection.
    #[serde(default = "default_login_timeout")]
    pub login_timeout_ms: u64,

    /// How long to wait for the privilege-check reply once everything else
    /// has arrived.
    #[serde(default = "default_privileges_grace")]
    pub privileges_grace_ms: u64,

    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_ms: u64,

    /// Deadline for the first frame on a new peer socket.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// How long to wait for a peer to answer a server-brokered connect.
    #[serde(default = "default_indirect_timeout")]
    pub indirect_timeout_ms: u64,

    /// Idle deadline for transfer negotiation and the byte stream.
    #[serde(default = "default_transfer_timeout")]
    pub transfer_timeout_ms: u64,

    /// Maximum concurrently admitted peer control sockets.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    /// Maximum distributed children.
    #[serde(default = "default_max_children")]
    pub max_children: usize,

    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_server_addr() -> String {
    DEFAULT_SERVER_ADDR.into()
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_client_version() -> u32 {
    CLIENT_VERSION
}

fn default_minor_version() -> u32 {
    CLIENT_MINOR_VERSION
}

fn default_operation_timeout() -> u64 {
    3_000
}

fn default_login_timeout() -> u64 {
    10_000
}

fn default_privileges_grace() -> u64 {
    2_000
}

fn default_dial_timeout() -> u64 {
    5_000
}

fn default_handshake_timeout() -> u64 {
    5_000
}

fn default_indirect_timeout() -> u64 {
    10_000
}

fn default_transfer_timeout() -> u64 {
    60_000
}

fn default_max_peers() -> usize {
    128
}

fn default_max_children() -> usize {
    10
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            listen_port: default_listen_port(),
            username: String::new(),
            password: String::new(),
            shared_folders: 0,
            shared_files: 0,
            client_version: default_client_version(),
            minor_version: default_minor_version(),
            operation_timeout_ms: default_operation_timeout(),
            login_timeout_ms: default_login_timeout(),
            privileges_grace_ms: default_privileges_grace(),
            dial_timeout_ms: default_dial_timeout(),
            handshake_timeout_ms: default_handshake_timeout(),
            indirect_timeout_ms: default_indirect_timeout(),
            transfer_timeout_ms: default_transfer_timeout(),
            max_peers: default_max_peers(),
            max_children: default_max_children(),
            download_dir: default_download_dir(),
        }
    }
}

impl ClientConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn privileges_grace(&self) -> Duration {
        Duration::from_millis(self.privileges_grace_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn indirect_timeout(&self) -> Duration {
        Duration::from_millis(self.indirect_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }
}
