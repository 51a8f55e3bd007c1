//! The client session: one directory-server connection, one listener, and
//! everything that hangs off them.

use std::sync::Arc;

use parking_lot::Mutex;
use slsk_data_channel::local_file_name;
use slsk_notify::{DeliveryPolicy, Notifier, Subscription};
use slsk_protocol::messages::peer::{
    FileSearchResponse, QueueUpload, TransferRequest, TransferResponse, UploadDenied,
};
use slsk_protocol::messages::server::{
    ConnectToPeerResponse, EmbeddedMessage, FileSearch, GetPeerAddressResponse,
    GetUserStatsResponse, GetUserStatusResponse, PossibleParents, WatchUserResponse,
};
use slsk_protocol::{CodeWidth, Frame, Token, TokenGenerator, TransferDirection, TransferRejection};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::admission::Admission;
use crate::config::ClientConfig;
use crate::connection::{Connection, FrameHandler, spawn_connection};
use crate::context::SessionContext;
use crate::dispatch::Dispatcher;
use crate::distributed::{self, DistributedNode, DistributedState};
use crate::download::{self, DownloadRequest};
use crate::error::ClientError;
use crate::events::FromPeer;
use crate::files::FileSockets;
use crate::login::{self, LoginOutcome};
use crate::multiplexer;
use crate::peer::{Peer, PeerRegistry};
use crate::search::{Search, SearchRouter};
use crate::traversal::{self, PendingTokens};

/// A connected client.
///
/// Dropping the session tears it down, like [`Session::shutdown`].
pub struct Session {
    ctx: Arc<SessionContext>,
    listener: Mutex<Option<TcpListener>>,
}

impl Session {
    /// Binds the listening port and connects to the directory server.
    ///
    /// Both are fatal: the session does not exist without them.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
            .await
            .map_err(|source| ClientError::Bind {
                port: config.listen_port,
                source,
            })?;
        let local_port = listener.local_addr()?.port();

        let stream = connect_server(&config).await?;
        let remote = stream.peer_addr()?;
        info!(server = %config.server_addr, %remote, port = local_port, "connected to server");

        let cancel = CancellationToken::new();
        let notifier = Notifier::new(DeliveryPolicy::with_deadline(config.operation_timeout()));
        let handler = Arc::new(ServerHandler {
            dispatch: Dispatcher::server(),
            notifier: notifier.clone(),
            cancel: cancel.clone(),
        });
        let server = spawn_connection(stream, remote, CodeWidth::Four, &cancel, handler);

        let ctx = SessionContext {
            node: DistributedNode::new(&config.username, config.max_children),
            admission: Admission::new(config.max_peers),
            server,
            local_port,
            notifier,
            peers: PeerRegistry::new(),
            pending: PendingTokens::new(),
            files: FileSockets::new(),
            searches: Arc::new(SearchRouter::new()),
            tokens: TokenGenerator::new(),
            peer_dispatch: Dispatcher::peer(),
            cancel,
            config,
        };
        Ok(Self {
            ctx: Arc::new(ctx),
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Logs in, then starts accepting peers and handling server events.
    ///
    /// A failed login may be retried; a successful one may not be repeated.
    pub async fn login(&self) -> Result<LoginOutcome, ClientError> {
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or(ClientError::AlreadyLoggedIn)?;

        // Subscribe before logging in so nothing sent meanwhile is lost.
        let events = ServerEvents::subscribe(&self.ctx.notifier);
        let outcome = match login::login(&self.ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                *self.listener.lock() = Some(listener);
                return Err(e);
            }
        };

        tokio::spawn(multiplexer::run_acceptor(Arc::clone(&self.ctx), listener));
        tokio::spawn(run_server_events(Arc::clone(&self.ctx), events));
        Ok(outcome)
    }

    /// Cancels every task and closes every socket of the session.
    pub fn shutdown(&self) {
        if !self.ctx.cancel.is_cancelled() {
            info!(user = %self.ctx.username(), "session shutting down");
        }
        self.ctx.cancel.cancel();
    }

    /// Resolves once the session has ended, by shutdown or server loss.
    pub async fn closed(&self) {
        self.ctx.cancel.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    pub fn username(&self) -> &str {
        self.ctx.username()
    }

    /// Port peers reach us on.
    pub fn local_port(&self) -> u16 {
        self.ctx.local_port
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    pub fn peer(&self, username: &str) -> Option<Arc<Peer>> {
        self.ctx.peers.get(username)
    }

    pub fn peers(&self) -> Vec<String> {
        self.ctx.peers.usernames()
    }

    pub fn distributed_state(&self) -> DistributedState {
        self.ctx.node.state()
    }

    /// Users currently attached below us in the distributed tree.
    pub fn distributed_children(&self) -> Vec<String> {
        self.ctx.node.children()
    }

    /// Subscribes to every published value of type `T`.
    pub fn subscribe<T>(&self) -> Subscription<T>
    where
        T: Clone + Send + 'static,
    {
        self.ctx.notifier.subscribe::<T>()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.ctx.notifier
    }

    /// A fresh token for [`search`](Self::search) or
    /// [`download`](Self::download).
    pub fn next_token(&self) -> Token {
        self.ctx.next_token()
    }

    /// Starts a search. Results arrive on the returned handle until it is
    /// dropped.
    pub async fn search(&self, token: Token, query: &str) -> Result<Search, ClientError> {
        let search = Search::new(Arc::clone(&self.ctx.searches), token);
        self.ctx
            .server
            .send(&FileSearch {
                token,
                query: query.to_owned(),
            })
            .await?;
        info!(%token, %query, "search sent");
        Ok(search)
    }

    /// Downloads `filename` from `username` into the download directory.
    ///
    /// The peer must already have a live control socket, see
    /// [`connect_peer`](Self::connect_peer). Returns the bytes written.
    pub async fn download(
        &self,
        username: &str,
        token: Token,
        filename: &str,
        size: u64,
    ) -> Result<u64, ClientError> {
        let dest = self.ctx.config.download_dir.join(local_file_name(filename)?);
        let req = DownloadRequest {
            username: username.to_owned(),
            token,
            filename: filename.to_owned(),
            size,
            dest,
        };
        download::download(&self.ctx, req).await
    }

    /// Returns a control socket to `username`, connecting if necessary.
    pub async fn connect_peer(&self, username: &str) -> Result<Connection, ClientError> {
        traversal::connect_peer(&self.ctx, username).await
    }

    /// Asks the server where `username` listens. `None` means offline.
    pub async fn get_peer_address(
        &self,
        username: &str,
    ) -> Result<Option<std::net::SocketAddr>, ClientError> {
        traversal::get_peer_address(&self.ctx, username).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.ctx.username())
            .field("local_port", &self.ctx.local_port)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn connect_server(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    let connect = TcpStream::connect(config.server_addr.as_str());
    match tokio::time::timeout(config.dial_timeout(), connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ClientError::ServerConnect {
            addr: config.server_addr.clone(),
            source,
        }),
        Err(_) => Err(ClientError::ServerConnect {
            addr: config.server_addr.clone(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        }),
    }
}

/// Read side of the server connection. Losing it ends the session.
struct ServerHandler {
    dispatch: Dispatcher,
    notifier: Notifier,
    cancel: CancellationToken,
}

impl FrameHandler for ServerHandler {
    fn on_frame(&self, _conn: &Connection, frame: Frame) {
        match self.dispatch.dispatch(&frame, &self.notifier, "server") {
            Ok(true) => {}
            Ok(false) => trace!(code = frame.code, "unhandled server message"),
            Err(e) => debug!(code = frame.code, "bad server message: {e}"),
        }
    }

    fn on_close(&self, _conn: &Connection) {
        if !self.cancel.is_cancelled() {
            warn!("server connection lost");
        }
        self.cancel.cancel();
    }
}

/// Subscriptions the long-running event loop consumes.
struct ServerEvents {
    connects: Subscription<ConnectToPeerResponse>,
    parents: Subscription<PossibleParents>,
    embedded: Subscription<EmbeddedMessage>,
    addresses: Subscription<GetPeerAddressResponse>,
    statuses: Subscription<GetUserStatusResponse>,
    stats: Subscription<GetUserStatsResponse>,
    watches: Subscription<WatchUserResponse>,
    results: Subscription<FromPeer<FileSearchResponse>>,
    queue_requests: Subscription<FromPeer<QueueUpload>>,
    transfer_requests: Subscription<FromPeer<TransferRequest>>,
}

impl ServerEvents {
    fn subscribe(notifier: &Notifier) -> Self {
        Self {
            connects: notifier.subscribe(),
            parents: notifier.subscribe(),
            embedded: notifier.subscribe(),
            addresses: notifier.subscribe(),
            statuses: notifier.subscribe(),
            stats: notifier.subscribe(),
            watches: notifier.subscribe(),
            results: notifier.subscribe(),
            queue_requests: notifier.subscribe(),
            transfer_requests: notifier.subscribe(),
        }
    }
}

async fn run_server_events(ctx: Arc<SessionContext>, mut ev: ServerEvents) {
    debug!("server event loop started");
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,

            Some(req) = ev.connects.recv() => {
                tokio::spawn(traversal::on_connect_to_peer(Arc::clone(&ctx), req));
            }
            Some(offer) = ev.parents.recv() => {
                tokio::spawn(distributed::on_possible_parents(Arc::clone(&ctx), offer));
            }
            Some(msg) = ev.embedded.recv() => distributed::on_server_embedded(&ctx, &msg),

            Some(m) = ev.addresses.recv() => {
                if let (Some(peer), Some(addr)) = (ctx.peers.get(&m.username), m.socket_addr()) {
                    peer.update_info(|i| i.addr = Some(addr));
                }
            }
            Some(m) = ev.statuses.recv() => {
                if let Some(peer) = ctx.peers.get(&m.username) {
                    peer.update_info(|i| {
                        i.status = m.status;
                        i.privileged = m.privileged;
                    });
                }
            }
            Some(m) = ev.stats.recv() => {
                if let Some(peer) = ctx.peers.get(&m.username) {
                    peer.update_info(|i| {
                        i.avg_speed = m.stats.avg_speed;
                        i.queued_uploads = m.stats.upload_count;
                        i.files = m.stats.files;
                        i.dirs = m.stats.dirs;
                    });
                }
            }
            Some(m) = ev.watches.recv() => {
                if m.exists
                    && let Some(peer) = ctx.peers.get(&m.username)
                {
                    peer.update_info(|i| {
                        i.status = m.status;
                        i.avg_speed = m.stats.avg_speed;
                        i.queued_uploads = m.stats.upload_count;
                        i.files = m.stats.files;
                        i.dirs = m.stats.dirs;
                    });
                }
            }

            Some(r) = ev.results.recv() => {
                ctx.searches.route(r.message);
            }
            Some(q) = ev.queue_requests.recv() => {
                refuse(&ctx, &q.username, &UploadDenied {
                    filename: q.message.filename,
                    reason: TransferRejection::FileNotShared,
                });
            }
            Some(t) = ev.transfer_requests.recv() => {
                if t.message.direction == TransferDirection::Download {
                    refuse(&ctx, &t.username, &TransferResponse::rejected(
                        t.message.token,
                        TransferRejection::FileNotShared,
                    ));
                }
            }

            else => break,
        }
    }
    debug!("server event loop stopped");
}

/// Answers an upload request on the peer's control socket. We share
/// nothing, so every request is refused.
fn refuse<M: slsk_protocol::Message>(ctx: &SessionContext, username: &str, reply: &M) {
    let Some(control) = ctx.peers.get(username).and_then(|p| p.control()) else {
        return;
    };
    if let Err(e) = control.try_send(reply) {
        debug!(peer = %username, "cannot refuse upload: {e}");
    }
}
