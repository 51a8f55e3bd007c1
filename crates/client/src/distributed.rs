//! Distributed search tree.
//!
//! The server does not send searches to every client. It sends them to a
//! handful of branch roots, and each node forwards what its parent sends
//! to its own children. A node starts unattached, advertising itself as
//! root of its own branch at level 0. When the server offers parent
//! candidates it tries them in the given order and attaches to the first
//! that completes the handshake, adopting the parent's root and level + 1.
//! Losing the parent puts it back to unattached until the next offer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use slsk_protocol::messages::distributed::{
    DistributedBranchLevel, DistributedBranchRoot, DistributedChildDepth,
    DistributedEmbeddedMessage, DistributedPing, DistributedSearch,
};
use slsk_protocol::messages::init::PeerInit;
use slsk_protocol::messages::server::{
    BranchLevel, BranchRoot, EmbeddedMessage, HaveNoParent, PossibleParents,
};
use slsk_protocol::{CodeWidth, ConnectionType, Frame, Message, ParentCandidate, read_frame};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, FrameHandler, spawn_connection_after};
use crate::context::{SessionContext, bounded};
use crate::dispatch::Router;
use crate::error::ClientError;
use crate::peer::SocketRole;
use crate::traversal::dial;

const SEARCH: u32 = DistributedSearch::CODE;
const BRANCH_LEVEL: u32 = DistributedBranchLevel::CODE;
const BRANCH_ROOT: u32 = DistributedBranchRoot::CODE;

/// What a parent may send us.
static PARENT_ROUTES: LazyLock<Router<ParentHandler>> = LazyLock::new(|| {
    let mut r = Router::<ParentHandler>::new(CodeWidth::One);
    r.on_frame::<DistributedSearch>(|h, _conn, frame| relay_search(&h.ctx, frame))
        .on::<DistributedBranchLevel>(|h, conn, m| {
            if h.ctx.node.adopt_level(conn.id(), m.level) {
                report_branch(&h.ctx);
            }
        })
        .on::<DistributedBranchRoot>(|h, conn, m| {
            if h.ctx.node.adopt_root(conn.id(), m.root) {
                report_branch(&h.ctx);
            }
        })
        .on::<DistributedEmbeddedMessage>(|h, _conn, m| relay_search(&h.ctx, &m.inner_frame()))
        .ignore::<DistributedPing>()
        .ignore::<DistributedChildDepth>();
    r
});

/// What a child may send us. Children only report their depth.
static CHILD_ROUTES: LazyLock<Router<ChildHandler>> = LazyLock::new(|| {
    let mut r = Router::<ChildHandler>::new(CodeWidth::One);
    r.on::<DistributedChildDepth>(|h, _conn, m| {
        trace!(child = %h.username, depth = m.depth, "child depth");
    })
    .ignore::<DistributedPing>();
    r
});

/// Our position in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributedState {
    /// No parent; we advertise ourselves as a level-0 branch root.
    Unattached,
    Attached {
        parent: String,
        level: u32,
        root: String,
    },
}

struct ParentLink {
    username: String,
    conn: Connection,
}

struct Branch {
    parent: Option<ParentLink>,
    level: u32,
    root: String,
}

/// Local node of the distributed tree.
pub struct DistributedNode {
    username: String,
    max_children: usize,
    branch: RwLock<Branch>,
    children: RwLock<HashMap<String, Connection>>,
    selecting: AtomicBool,
}

/// Clears the "selection in progress" flag when dropped.
pub(crate) struct SelectionGuard<'a>(&'a AtomicBool);

impl Drop for SelectionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DistributedNode {
    pub fn new(username: &str, max_children: usize) -> Self {
        Self {
            username: username.to_owned(),
            max_children,
            branch: RwLock::new(Branch {
                parent: None,
                level: 0,
                root: username.to_owned(),
            }),
            children: RwLock::new(HashMap::new()),
            selecting: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> DistributedState {
        let branch = self.branch.read();
        match &branch.parent {
            Some(p) => DistributedState::Attached {
                parent: p.username.clone(),
                level: branch.level,
                root: branch.root.clone(),
            },
            None => DistributedState::Unattached,
        }
    }

    /// Level and root we currently advertise.
    pub fn branch(&self) -> (u32, String) {
        let branch = self.branch.read();
        (branch.level, branch.root.clone())
    }

    pub fn is_attached(&self) -> bool {
        self.branch.read().parent.is_some()
    }

    pub fn children(&self) -> Vec<String> {
        self.children.read().keys().cloned().collect()
    }

    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    pub(crate) fn begin_selection(&self) -> Option<SelectionGuard<'_>> {
        self.selecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SelectionGuard(&self.selecting))
    }

    /// Attaches to a parent advertising `parent_level` and `root`.
    /// Returns the previous parent connection, if any.
    pub(crate) fn set_parent(
        &self,
        username: &str,
        conn: Connection,
        parent_level: u32,
        root: String,
    ) -> Option<Connection> {
        let mut branch = self.branch.write();
        branch.level = parent_level.saturating_add(1);
        branch.root = root;
        branch
            .parent
            .replace(ParentLink {
                username: username.to_owned(),
                conn,
            })
            .map(|old| old.conn)
    }

    /// Reverts to unattached if `id` is still the parent connection.
    pub(crate) fn clear_parent(&self, id: u64) -> bool {
        let mut branch = self.branch.write();
        if !branch.parent.as_ref().is_some_and(|p| p.conn.id() == id) {
            return false;
        }
        branch.parent = None;
        branch.level = 0;
        branch.root = self.username.clone();
        true
    }

    /// Adopts a level update from parent connection `id`.
    pub(crate) fn adopt_level(&self, id: u64, parent_level: u32) -> bool {
        let mut branch = self.branch.write();
        if !branch.parent.as_ref().is_some_and(|p| p.conn.id() == id) {
            return false;
        }
        let level = parent_level.saturating_add(1);
        let changed = branch.level != level;
        branch.level = level;
        changed
    }

    /// Adopts a root update from parent connection `id`.
    pub(crate) fn adopt_root(&self, id: u64, root: String) -> bool {
        let mut branch = self.branch.write();
        if !branch.parent.as_ref().is_some_and(|p| p.conn.id() == id) {
            return false;
        }
        let changed = branch.root != root;
        branch.root = root;
        changed
    }

    /// Adds a child, replacing an older socket from the same user.
    /// Refuses new users once the limit is reached.
    pub(crate) fn add_child(&self, username: &str, conn: Connection) -> bool {
        let mut children = self.children.write();
        if children.len() >= self.max_children && !children.contains_key(username) {
            return false;
        }
        if let Some(old) = children.insert(username.to_owned(), conn)
            && !old.is_closed()
        {
            old.close();
        }
        true
    }

    pub(crate) fn remove_child(&self, username: &str, id: u64) -> bool {
        let mut children = self.children.write();
        if children.get(username).is_some_and(|c| c.id() == id) {
            children.remove(username);
            true
        } else {
            false
        }
    }

    /// Queues an encoded distributed frame on every child. Returns how many
    /// children took it.
    pub fn relay(&self, bytes: &[u8]) -> usize {
        let children = self.children.read();
        let mut delivered = 0;
        for (username, conn) in children.iter() {
            match conn.sender().try_send_raw(bytes.to_vec()) {
                Ok(()) => delivered += 1,
                Err(e) => trace!(child = %username, "relay skipped: {e}"),
            }
        }
        delivered
    }

    /// Sends our level and root to every child.
    pub(crate) fn announce_to_children(&self) {
        let (level, root) = self.branch();
        let (Ok(level), Ok(root)) = (
            DistributedBranchLevel { level }.to_bytes(),
            DistributedBranchRoot { root }.to_bytes(),
        ) else {
            return;
        };
        self.relay(&level);
        self.relay(&root);
    }
}

impl std::fmt::Debug for DistributedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedNode")
            .field("state", &self.state())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Reports our branch to the server and to every child.
fn report_branch(ctx: &SessionContext) {
    let (level, root) = ctx.node.branch();
    if let Err(e) = ctx.server.try_send(&BranchLevel { level }) {
        debug!("cannot report branch level: {e}");
    }
    if let Err(e) = ctx.server.try_send(&BranchRoot { root }) {
        debug!("cannot report branch root: {e}");
    }
    ctx.node.announce_to_children();
}

/// Forwards a distributed frame to all children, byte for byte, and
/// publishes it locally if it is a search.
fn relay_search(ctx: &SessionContext, frame: &Frame) {
    let bytes = frame.encode(CodeWidth::One);
    let delivered = ctx.node.relay(&bytes);
    if frame.code != SEARCH {
        trace!(code = frame.code, delivered, "relayed distributed frame");
        return;
    }
    match DistributedSearch::from_frame(frame) {
        Ok(search) => {
            trace!(token = %search.token, from = %search.username, delivered, "relayed search");
            ctx.notifier.publish(search);
        }
        Err(e) => debug!("undecodable distributed search: {e}"),
    }
}

/// Handles an embedded search the server sent us directly.
pub(crate) fn on_server_embedded(ctx: &SessionContext, msg: &EmbeddedMessage) {
    let frame = Frame::new(u32::from(msg.distributed_code), msg.payload.clone());
    relay_search(ctx, &frame);
}

/// Runs parent selection over a server offer.
pub(crate) async fn on_possible_parents(ctx: Arc<SessionContext>, offer: PossibleParents) {
    if ctx.node.is_attached() {
        trace!("already attached, ignoring parent offer");
        return;
    }
    let Some(_selecting) = ctx.node.begin_selection() else {
        debug!("parent selection already running");
        return;
    };

    if let Err(e) = ctx.server.send(&HaveNoParent { no_parent: false }).await {
        debug!("cannot announce parent search: {e}");
        return;
    }

    for candidate in &offer.parents {
        if candidate.username == ctx.username() {
            continue;
        }
        match handshake_parent(&ctx, candidate).await {
            Ok((stream, addr, level, root)) => {
                attach_parent(&ctx, &candidate.username, stream, addr, level, root);
                return;
            }
            Err(ClientError::Cancelled) => return,
            Err(e) => {
                debug!(parent = %candidate.username, "parent candidate failed: {e}");
            }
        }
    }

    debug!(offered = offer.parents.len(), "no parent candidate reachable");
    if let Err(e) = ctx.server.send(&HaveNoParent { no_parent: true }).await {
        debug!("cannot announce missing parent: {e}");
    }
}

/// Dials a candidate, introduces us as a distributed child and waits for
/// its branch level and root.
async fn handshake_parent(
    ctx: &Arc<SessionContext>,
    candidate: &ParentCandidate,
) -> Result<(TcpStream, SocketAddr, u32, String), ClientError> {
    let addr = candidate
        .socket_addr()
        .ok_or_else(|| ClientError::PeerUnreachable(candidate.username.clone()))?;
    let mut stream = dial(addr, ctx.config.dial_timeout()).await?;

    let init = PeerInit {
        username: ctx.username().to_owned(),
        conn_type: ConnectionType::Distributed,
        token: ctx.next_token(),
    };
    stream.write_all(&init.to_bytes()?).await?;

    let (level, root) = bounded(
        &ctx.cancel,
        ctx.config.handshake_timeout(),
        "parent branch info",
        read_branch_info(&mut stream),
    )
    .await?;
    Ok((stream, addr, level, root))
}

async fn read_branch_info(stream: &mut TcpStream) -> Result<(u32, String), ClientError> {
    let mut level = None;
    let mut root = None;
    loop {
        let frame = read_frame(stream, CodeWidth::One)
            .await?
            .ok_or(ClientError::Closed)?;
        match frame.code {
            BRANCH_LEVEL => level = Some(DistributedBranchLevel::from_frame(&frame)?.level),
            BRANCH_ROOT => root = Some(DistributedBranchRoot::from_frame(&frame)?.root),
            code => trace!(code, "frame before branch info ignored"),
        }
        if let (Some(level), Some(root)) = (level, root.as_ref()) {
            return Ok((level, root.clone()));
        }
    }
}

fn attach_parent(
    ctx: &Arc<SessionContext>,
    username: &str,
    stream: TcpStream,
    addr: SocketAddr,
    level: u32,
    root: String,
) {
    let handler = Arc::new(ParentHandler {
        ctx: Arc::clone(ctx),
        username: username.to_owned(),
    });
    let peer = ctx.peers.get_or_create(username);
    spawn_connection_after(stream, addr, CodeWidth::One, &ctx.cancel, handler, |conn| {
        if let Some(old) = ctx.node.set_parent(username, conn.clone(), level, root) {
            old.close();
        }
        peer.attach(SocketRole::Distributed, conn.clone());
    });

    let (level, root) = ctx.node.branch();
    info!(parent = %username, level, %root, "attached to distributed parent");
    report_branch(ctx);
}

/// Makes `stream` a distributed child of ours.
pub(crate) fn accept_child(
    ctx: &Arc<SessionContext>,
    username: &str,
    stream: TcpStream,
    addr: SocketAddr,
) {
    let handler = Arc::new(ChildHandler {
        ctx: Arc::clone(ctx),
        username: username.to_owned(),
    });
    let peer = ctx.peers.get_or_create(username);
    let (conn, admitted) =
        spawn_connection_after(stream, addr, CodeWidth::One, &ctx.cancel, handler, |conn| {
            if !ctx.node.add_child(username, conn.clone()) {
                conn.close();
                return false;
            }
            peer.attach(SocketRole::Distributed, conn.clone());
            true
        });
    if !admitted {
        debug!(child = %username, max = ctx.node.max_children, "child limit reached, refusing");
        return;
    }

    let (level, root) = ctx.node.branch();
    if let Err(e) = conn.try_send(&DistributedBranchLevel { level }) {
        debug!(child = %username, "cannot send branch level: {e}");
    }
    if let Err(e) = conn.try_send(&DistributedBranchRoot { root }) {
        debug!(child = %username, "cannot send branch root: {e}");
    }
    info!(child = %username, children = ctx.node.child_count(), "distributed child attached");
}

/// Read side of the parent socket.
struct ParentHandler {
    ctx: Arc<SessionContext>,
    username: String,
}

impl FrameHandler for ParentHandler {
    fn on_frame(&self, conn: &Connection, frame: Frame) {
        match PARENT_ROUTES.route(self, conn, &frame) {
            Ok(true) => {}
            Ok(false) => {
                trace!(parent = %self.username, code = frame.code, "unhandled distributed message");
            }
            Err(e) => {
                debug!(parent = %self.username, code = frame.code, "bad distributed message: {e}");
            }
        }
    }

    fn on_close(&self, conn: &Connection) {
        let ctx = &self.ctx;
        if let Some(peer) = ctx.peers.get(&self.username) {
            peer.detach(SocketRole::Distributed, conn.id());
        }
        if !ctx.node.clear_parent(conn.id()) {
            return;
        }
        warn!(parent = %self.username, "lost distributed parent");
        if let Err(e) = ctx.server.try_send(&HaveNoParent { no_parent: true }) {
            debug!("cannot announce missing parent: {e}");
        }
        report_branch(ctx);
    }
}

/// Read side of a child socket.
struct ChildHandler {
    ctx: Arc<SessionContext>,
    username: String,
}

impl FrameHandler for ChildHandler {
    fn on_frame(&self, conn: &Connection, frame: Frame) {
        match CHILD_ROUTES.route(self, conn, &frame) {
            Ok(true) => {}
            Ok(false) => {
                trace!(child = %self.username, code = frame.code, "unexpected frame from child");
            }
            Err(e) => debug!(child = %self.username, code = frame.code, "bad frame: {e}"),
        }
    }

    fn on_close(&self, conn: &Connection) {
        if self.ctx.node.remove_child(&self.username, conn.id()) {
            debug!(child = %self.username, "distributed child left");
        }
        if let Some(peer) = self.ctx.peers.get(&self.username) {
            peer.detach(SocketRole::Distributed, conn.id());
        }
    }
}
