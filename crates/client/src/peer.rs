//! Peer records and the registry that owns them.
//!
//! A peer is keyed by username and holds at most one live socket per role.
//! Records are created on first contact and never removed; sockets are
//! closed and replaced. Each peer carries its own locks so updates to one
//! peer never contend with another.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use slsk_protocol::UserStatus;
use tokio::sync::Notify;
use tracing::debug;

use crate::connection::Connection;

/// Socket roles that occupy a slot on the peer record. File-data sockets
/// are keyed by transfer token instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    Control,
    Distributed,
}

/// Last-known facts about a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub status: UserStatus,
    pub avg_speed: u32,
    pub queued_uploads: u32,
    pub files: u32,
    pub dirs: u32,
    pub privileged: bool,
    /// Listening address as reported by the server.
    pub addr: Option<SocketAddr>,
}

#[derive(Default)]
struct Slots {
    control: Option<Connection>,
    distributed: Option<Connection>,
}

impl Slots {
    fn slot(&mut self, role: SocketRole) -> &mut Option<Connection> {
        match role {
            SocketRole::Control => &mut self.control,
            SocketRole::Distributed => &mut self.distributed,
        }
    }
}

/// One remote user.
pub struct Peer {
    username: String,
    info: RwLock<PeerInfo>,
    slots: RwLock<Slots>,
    control_attached: Notify,
}

impl Peer {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_owned(),
            info: RwLock::new(PeerInfo::default()),
            slots: RwLock::new(Slots::default()),
            control_attached: Notify::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn info(&self) -> PeerInfo {
        self.info.read().clone()
    }

    pub fn update_info(&self, f: impl FnOnce(&mut PeerInfo)) {
        f(&mut self.info.write());
    }

    /// The live control socket, if any.
    pub fn control(&self) -> Option<Connection> {
        self.socket(SocketRole::Control)
    }

    /// The live distributed socket, if any.
    pub fn distributed(&self) -> Option<Connection> {
        self.socket(SocketRole::Distributed)
    }

    fn socket(&self, role: SocketRole) -> Option<Connection> {
        let slots = self.slots.read();
        let conn = match role {
            SocketRole::Control => slots.control.as_ref(),
            SocketRole::Distributed => slots.distributed.as_ref(),
        };
        conn.filter(|c| !c.is_closed()).cloned()
    }

    /// Installs `conn` in the role's slot.
    ///
    /// A previous socket in the same slot is closed before the new one
    /// becomes visible.
    pub(crate) fn attach(&self, role: SocketRole, conn: Connection) {
        let mut slots = self.slots.write();
        let slot = slots.slot(role);
        if let Some(old) = slot.take()
            && old.id() != conn.id()
        {
            debug!(peer = %self.username, ?role, old = old.id(), new = conn.id(), "replacing socket");
            old.close();
        }
        *slot = Some(conn);
        drop(slots);

        if role == SocketRole::Control {
            self.control_attached.notify_waiters();
        }
    }

    /// Clears the role's slot if it still holds connection `id`.
    ///
    /// Returns `false` when the slot has already been taken over by a newer
    /// socket.
    pub(crate) fn detach(&self, role: SocketRole, id: u64) -> bool {
        let mut slots = self.slots.write();
        let slot = slots.slot(role);
        if slot.as_ref().is_some_and(|c| c.id() == id) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Waits up to `timeout` for a live control socket.
    pub async fn wait_control(&self, timeout: Duration) -> Option<Connection> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.control_attached.notified();
            tokio::pin!(notified);
            // Register before checking so an attach in between is not missed.
            notified.as_mut().enable();

            if let Some(conn) = self.control() {
                return Some(conn);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("username", &self.username)
            .field("info", &*self.info.read())
            .field("control", &self.control().map(|c| c.id()))
            .field("distributed", &self.distributed().map(|c| c.id()))
            .finish()
    }
}

/// All peers seen during the session.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Arc<Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, username: &str) -> Option<Arc<Peer>> {
        self.peers.read().get(username).cloned()
    }

    /// Returns the record for `username`, creating it if needed.
    ///
    /// Creation happens under the write lock, so concurrent first contacts
    /// for the same user (say an inbound init racing a server-brokered
    /// connect) always end up sharing one record.
    pub fn get_or_create(&self, username: &str) -> Arc<Peer> {
        if let Some(peer) = self.get(username) {
            return peer;
        }
        let mut peers = self.peers.write();
        peers
            .entry(username.to_owned())
            .or_insert_with(|| Arc::new(Peer::new(username)))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{FrameHandler, spawn_connection};
    use slsk_protocol::{CodeWidth, Frame};
    use tokio_util::sync::CancellationToken;

    struct Ignore;

    impl FrameHandler for Ignore {
        fn on_frame(&self, _conn: &Connection, _frame: Frame) {}
    }

    fn test_conn(cancel: &CancellationToken) -> (Connection, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(64);
        let conn = spawn_connection(
            ours,
            "127.0.0.1:2234".parse().unwrap(),
            CodeWidth::Four,
            cancel,
            Arc::new(Ignore),
        );
        (conn, theirs)
    }

    #[tokio::test]
    async fn second_control_socket_closes_the_first() {
        let cancel = CancellationToken::new();
        let peer = Peer::new("bob");
        let (first, _k1) = test_conn(&cancel);
        let (second, _k2) = test_conn(&cancel);

        peer.attach(SocketRole::Control, first.clone());
        assert_eq!(peer.control().map(|c| c.id()), Some(first.id()));

        peer.attach(SocketRole::Control, second.clone());
        assert!(first.is_closed());
        assert_eq!(peer.control().map(|c| c.id()), Some(second.id()));
    }

    #[tokio::test]
    async fn roles_are_independent() {
        let cancel = CancellationToken::new();
        let peer = Peer::new("bob");
        let (control, _k1) = test_conn(&cancel);
        let (dist, _k2) = test_conn(&cancel);

        peer.attach(SocketRole::Control, control.clone());
        peer.attach(SocketRole::Distributed, dist.clone());
        assert!(!control.is_closed());
        assert_eq!(peer.distributed().map(|c| c.id()), Some(dist.id()));
    }

    #[tokio::test]
    async fn stale_detach_keeps_newer_socket() {
        let cancel = CancellationToken::new();
        let peer = Peer::new("bob");
        let (first, _k1) = test_conn(&cancel);
        let (second, _k2) = test_conn(&cancel);

        peer.attach(SocketRole::Control, first.clone());
        peer.attach(SocketRole::Control, second.clone());
        assert!(!peer.detach(SocketRole::Control, first.id()));
        assert!(peer.control().is_some());
        assert!(peer.detach(SocketRole::Control, second.id()));
        assert!(peer.control().is_none());
    }

    #[tokio::test]
    async fn closed_socket_is_not_reported() {
        let cancel = CancellationToken::new();
        let peer = Peer::new("bob");
        let (conn, _k) = test_conn(&cancel);
        peer.attach(SocketRole::Control, conn.clone());
        conn.close();
        assert!(peer.control().is_none());
    }

    #[tokio::test]
    async fn wait_control_wakes_on_attach() {
        let cancel = CancellationToken::new();
        let peer = Arc::new(Peer::new("bob"));
        let (conn, _k) = test_conn(&cancel);

        let waiter = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.wait_control(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        peer.attach(SocketRole::Control, conn.clone());

        let got = waiter.await.unwrap();
        assert_eq!(got.map(|c| c.id()), Some(conn.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_control_times_out() {
        let peer = Peer::new("bob");
        assert!(peer.wait_control(Duration::from_secs(1)).await.is_none());
    }

    #[test]
    fn registry_returns_one_record_per_user() {
        let registry = PeerRegistry::new();
        let a = registry.get_or_create("alice");
        let b = registry.get_or_create("alice");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("carol").is_none());
    }

    #[test]
    fn concurrent_creation_is_single_flight() {
        let registry = Arc::new(PeerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = registry.clone();
                std::thread::spawn(move || r.get_or_create("dave"))
            })
            .collect();
        let peers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(peers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn info_updates_are_visible() {
        let peer = Peer::new("erin");
        peer.update_info(|i| {
            i.status = UserStatus::Online;
            i.avg_speed = 1000;
        });
        let info = peer.info();
        assert_eq!(info.status, UserStatus::Online);
        assert_eq!(info.avg_speed, 1000);
    }
}
