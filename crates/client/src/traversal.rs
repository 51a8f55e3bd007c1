//! Firewall traversal: getting a control socket to a peer.
//!
//! There are two ways to reach a peer. Directly, by dialling its listening
//! address and introducing ourselves with `PeerInit`. Or indirectly, by
//! asking the server to tell the peer to dial us; the peer then opens a
//! socket to our listener and sends `PierceFirewall` with a token we chose.
//! Outbound connects try both at once and keep whichever lands first.
//!
//! The server can also ask *us* to pierce on a peer's behalf
//! (`ConnectToPeer` arriving unsolicited). We dial the address it gives
//! and send the peer's token back; if that fails we tell the server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use slsk_protocol::messages::init::{PeerInit, PierceFirewall};
use slsk_protocol::messages::server::{
    CantConnectToPeer, CantConnectToPeerResponse, ConnectToPeer, ConnectToPeerResponse,
    GetPeerAddress, GetPeerAddressResponse,
};
use slsk_protocol::{ConnectionType, Message, Token};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::connection::Connection;
use crate::context::{SessionContext, bounded};
use crate::error::ClientError;
use crate::{distributed, multiplexer};

struct PendingConnect {
    username: String,
    tx: oneshot::Sender<TcpStream>,
}

/// Outstanding indirect-connect tokens.
///
/// A token is single-use: redeeming it removes it, and any later socket
/// carrying the same token is dropped.
#[derive(Default)]
pub struct PendingTokens {
    pending: RwLock<HashMap<Token, PendingConnect>>,
}

impl PendingTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token`; the receiver yields the socket that redeems it.
    pub fn register(&self, token: Token, username: &str) -> oneshot::Receiver<TcpStream> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().insert(
            token,
            PendingConnect {
                username: username.to_owned(),
                tx,
            },
        );
        rx
    }

    /// Hands `stream` to the attempt waiting on `token`.
    ///
    /// Returns `false` when the token is unknown, already redeemed, or its
    /// attempt has been abandoned; the stream is dropped in that case.
    pub fn redeem(&self, token: Token, stream: TcpStream) -> bool {
        let entry = self.pending.write().remove(&token);
        match entry {
            Some(p) => {
                debug!(peer = %p.username, %token, "firewall pierced");
                p.tx.send(stream).is_ok()
            }
            None => {
                debug!(%token, "unknown or already redeemed token, dropping socket");
                false
            }
        }
    }

    /// Abandons `token` without redeeming it.
    pub fn forget(&self, token: Token) {
        self.pending.write().remove(&token);
    }

    pub fn contains(&self, token: Token) -> bool {
        self.pending.read().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.pending.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.read().is_empty()
    }
}

/// Dials `addr` within `timeout`.
pub(crate) async fn dial(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, ClientError> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ClientError::Timeout("peer dial")),
    }
}

/// Asks the server for `username`'s listening address.
///
/// Returns `None` when the server reports the user offline (address
/// 0.0.0.0 or port 0).
pub(crate) async fn get_peer_address(
    ctx: &Arc<SessionContext>,
    username: &str,
) -> Result<Option<SocketAddr>, ClientError> {
    let mut replies = ctx.notifier.subscribe::<GetPeerAddressResponse>();
    ctx.server
        .send(&GetPeerAddress {
            username: username.to_owned(),
        })
        .await?;

    let addr = bounded(
        &ctx.cancel,
        ctx.config.operation_timeout(),
        "peer address",
        async {
            while let Some(reply) = replies.recv().await {
                if reply.username == username {
                    return Ok(reply.socket_addr());
                }
            }
            Err(ClientError::Closed)
        },
    )
    .await?;

    if let Some(addr) = addr {
        ctx.peers
            .get_or_create(username)
            .update_info(|i| i.addr = Some(addr));
    }
    Ok(addr)
}

/// Returns a live control socket to `username`, establishing one if needed.
pub(crate) async fn connect_peer(
    ctx: &Arc<SessionContext>,
    username: &str,
) -> Result<Connection, ClientError> {
    let peer = ctx.peers.get_or_create(username);
    if let Some(conn) = peer.control() {
        return Ok(conn);
    }

    let permit = ctx.admission.acquire(&ctx.cancel).await?;

    let addr = match peer.info().addr {
        Some(addr) => Some(addr),
        None => get_peer_address(ctx, username).await.unwrap_or_else(|e| {
            debug!(peer = %username, "address lookup failed: {e}");
            None
        }),
    };

    // The peer may have dialled in while we were looking it up.
    if let Some(conn) = peer.control() {
        debug!(peer = %username, "peer connected first, no connect needed");
        return Ok(conn);
    }

    let token = ctx.next_token();
    let pierced = ctx.pending.register(token, username);
    let mut refusals = ctx.notifier.subscribe::<CantConnectToPeerResponse>();
    let request = ConnectToPeer {
        token,
        username: username.to_owned(),
        conn_type: ConnectionType::Peer,
    };
    if let Err(e) = ctx.server.send(&request).await {
        ctx.pending.forget(token);
        return Err(e);
    }

    let direct = async {
        match addr {
            Some(addr) => dial_direct(ctx, addr, token).await,
            None => Err(ClientError::PeerUnreachable(username.to_owned())),
        }
    };
    let indirect = async {
        let refused = async {
            while let Some(r) = refusals.recv().await {
                if r.token == token {
                    return;
                }
            }
            std::future::pending::<()>().await
        };
        tokio::select! {
            stream = pierced => stream.map_err(|_| ClientError::Closed),
            _ = refused => Err(ClientError::PeerUnreachable(username.to_owned())),
            _ = tokio::time::sleep(ctx.config.indirect_timeout()) => {
                Err(ClientError::Timeout("firewall pierce"))
            }
        }
    };
    // The peer's own PeerInit attaching a control socket also ends the race.
    let inbound = async {
        match peer.wait_control(ctx.config.indirect_timeout()).await {
            Some(conn) => conn,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(direct, indirect, inbound);

    let mut direct_failed = false;
    let mut indirect_failed = false;
    let outcome = loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break Err(ClientError::Cancelled),

            conn = &mut inbound => {
                debug!(peer = %username, conn = conn.id(), "inbound connect won");
                break Ok(Winner::Attached(conn));
            }

            result = &mut direct, if !direct_failed => match result {
                Ok(stream) => {
                    debug!(peer = %username, "direct connect won");
                    break Ok(Winner::Stream(stream));
                }
                Err(e) => {
                    debug!(peer = %username, "direct connect failed: {e}");
                    direct_failed = true;
                    if indirect_failed {
                        break Err(ClientError::PeerUnreachable(username.to_owned()));
                    }
                }
            },

            result = &mut indirect, if !indirect_failed => match result {
                Ok(stream) => {
                    debug!(peer = %username, "indirect connect won");
                    break Ok(Winner::Stream(stream));
                }
                Err(e) => {
                    debug!(peer = %username, "indirect connect failed: {e}");
                    indirect_failed = true;
                    if direct_failed {
                        break Err(ClientError::PeerUnreachable(username.to_owned()));
                    }
                }
            },
        }
    };
    // Losing attempts are dropped with the futures; the token must not linger.
    ctx.pending.forget(token);

    match outcome? {
        // The inbound socket holds its own admission permit.
        Winner::Attached(conn) => Ok(conn),
        Winner::Stream(stream) => {
            let remote = stream.peer_addr()?;
            Ok(multiplexer::attach_control(
                ctx,
                username,
                stream,
                remote,
                Some(permit),
            ))
        }
    }
}

/// The first way through to a peer.
enum Winner {
    /// A socket of ours completed its handshake.
    Stream(TcpStream),
    /// The peer attached a control socket itself.
    Attached(Connection),
}

async fn dial_direct(
    ctx: &Arc<SessionContext>,
    addr: SocketAddr,
    token: Token,
) -> Result<TcpStream, ClientError> {
    let mut stream = dial(addr, ctx.config.dial_timeout()).await?;
    let init = PeerInit {
        username: ctx.username().to_owned(),
        conn_type: ConnectionType::Peer,
        token,
    };
    stream.write_all(&init.to_bytes()?).await?;
    Ok(stream)
}

/// Handles a server request to connect to a peer on its behalf.
pub(crate) async fn on_connect_to_peer(ctx: Arc<SessionContext>, req: ConnectToPeerResponse) {
    let peer = ctx.peers.get_or_create(&req.username);
    peer.update_info(|i| {
        i.privileged = req.privileged;
        if let Some(addr) = req.socket_addr() {
            i.addr = Some(addr);
        }
    });

    if req.conn_type == ConnectionType::Peer && peer.control().is_some() {
        debug!(peer = %req.username, token = %req.token, "control socket already live, ignoring connect request");
        return;
    }

    match pierce(&ctx, &req).await {
        Ok(()) => {
            info!(peer = %req.username, conn_type = %req.conn_type, "connected on server request");
        }
        Err(ClientError::Cancelled) => {}
        Err(e) => {
            debug!(peer = %req.username, token = %req.token, "cannot pierce firewall: {e}");
            let msg = CantConnectToPeer {
                token: req.token,
                username: req.username.clone(),
            };
            if let Err(e) = ctx.server.send(&msg).await {
                debug!("cannot report failed connect: {e}");
            }
        }
    }
}

async fn pierce(ctx: &Arc<SessionContext>, req: &ConnectToPeerResponse) -> Result<(), ClientError> {
    let addr = req
        .socket_addr()
        .ok_or_else(|| ClientError::PeerUnreachable(req.username.clone()))?;
    let permit = match req.conn_type {
        ConnectionType::Peer => Some(ctx.admission.acquire(&ctx.cancel).await?),
        _ => None,
    };

    let mut stream = dial(addr, ctx.config.dial_timeout()).await?;
    stream
        .write_all(&PierceFirewall { token: req.token }.to_bytes()?)
        .await?;

    match req.conn_type {
        ConnectionType::Peer => {
            multiplexer::attach_control(ctx, &req.username, stream, addr, permit);
        }
        ConnectionType::Distributed => distributed::accept_child(ctx, &req.username, stream, addr),
        ConnectionType::File => multiplexer::hand_over_file(ctx, &req.username, stream).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), server.unwrap().0)
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let pending = PendingTokens::new();
        let rx = pending.register(Token(42), "bob");
        assert!(pending.contains(Token(42)));

        let (first, _k1) = socket_pair().await;
        let first_addr = first.local_addr().unwrap();
        assert!(pending.redeem(Token(42), first));
        assert!(!pending.contains(Token(42)));
        assert_eq!(rx.await.unwrap().local_addr().unwrap(), first_addr);

        let (second, _k2) = socket_pair().await;
        assert!(!pending.redeem(Token(42), second));
    }

    #[tokio::test]
    async fn unknown_token_is_dropped() {
        let pending = PendingTokens::new();
        let (stream, _k) = socket_pair().await;
        assert!(!pending.redeem(Token(7), stream));
    }

    #[tokio::test]
    async fn abandoned_attempt_refuses_socket() {
        let pending = PendingTokens::new();
        let rx = pending.register(Token(1), "bob");
        drop(rx);
        let (stream, _k) = socket_pair().await;
        assert!(!pending.redeem(Token(1), stream));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn forget_removes_token() {
        let pending = PendingTokens::new();
        let _rx = pending.register(Token(3), "bob");
        pending.forget(Token(3));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn dial_refused_is_io_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = dial(addr, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
