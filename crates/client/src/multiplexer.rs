//! Socket role multiplexer.
//!
//! Every inbound socket starts with one handshake frame (1-byte code):
//! `PeerInit` names the remote user and the role the socket will serve,
//! `PierceFirewall` redeems a token from an indirect connect we requested.
//! Handshake failures close that socket and nothing else.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use slsk_data_channel::wire::read_token;
use slsk_protocol::messages::init::InitMessage;
use slsk_protocol::{CodeWidth, ConnectionType, Frame, read_frame};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

use crate::admission::AdmissionPermit;
use crate::connection::{Connection, FrameHandler, spawn_connection_after};
use crate::context::{SessionContext, bounded};
use crate::distributed;
use crate::error::ClientError;
use crate::peer::{Peer, SocketRole};

/// Accepts peer sockets until the session ends.
pub(crate) async fn run_acceptor(ctx: Arc<SessionContext>, listener: TcpListener) {
    info!(port = ctx.local_port, "accepting peer connections");
    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                debug!("acceptor shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_inbound(&ctx, stream, addr).await {
                                debug!(%addr, "inbound socket dropped: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!("accept error: {e}");
                    }
                }
            }
        }
    }
}

/// Reads the handshake frame and routes the socket by role.
async fn handle_inbound(
    ctx: &Arc<SessionContext>,
    mut stream: TcpStream,
    addr: SocketAddr,
) -> Result<(), ClientError> {
    let frame = bounded(&ctx.cancel, ctx.config.handshake_timeout(), "handshake", async {
        match read_frame(&mut stream, CodeWidth::One).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ClientError::Closed),
            Err(e) => Err(ClientError::from(e)),
        }
    })
    .await?;

    match InitMessage::from_frame(&frame)? {
        InitMessage::PeerInit(init) => {
            debug!(peer = %init.username, conn_type = %init.conn_type, %addr, "peer init");
            match init.conn_type {
                ConnectionType::Peer => {
                    let permit = ctx.admission.acquire(&ctx.cancel).await?;
                    attach_control(ctx, &init.username, stream, addr, Some(permit));
                }
                ConnectionType::Distributed => {
                    distributed::accept_child(ctx, &init.username, stream, addr);
                }
                ConnectionType::File => {
                    hand_over_file(ctx, &init.username, stream).await?;
                }
            }
        }
        InitMessage::PierceFirewall(pierce) => {
            ctx.pending.redeem(pierce.token, stream);
        }
    }
    Ok(())
}

/// Reads the uploader's token off a file socket and passes the socket to
/// the download expecting it.
pub(crate) async fn hand_over_file(
    ctx: &Arc<SessionContext>,
    username: &str,
    mut stream: TcpStream,
) -> Result<(), ClientError> {
    let token = bounded(&ctx.cancel, ctx.config.handshake_timeout(), "file token", async {
        read_token(&mut stream).await.map_err(ClientError::from)
    })
    .await?;

    if ctx.files.deliver(username, token, stream) {
        debug!(peer = %username, %token, "file socket handed over");
    } else {
        debug!(peer = %username, %token, "unexpected file socket, closing");
    }
    Ok(())
}

/// Makes `stream` the control socket of `username`.
///
/// A previous control socket is closed before the new one's read loop
/// starts. The admission permit, if any, is released when the socket
/// closes.
pub(crate) fn attach_control(
    ctx: &Arc<SessionContext>,
    username: &str,
    stream: TcpStream,
    addr: SocketAddr,
    permit: Option<AdmissionPermit>,
) -> Connection {
    let peer = ctx.peers.get_or_create(username);
    let handler = Arc::new(ControlHandler {
        ctx: Arc::clone(ctx),
        peer: Arc::clone(&peer),
        permit: Mutex::new(permit),
    });
    let (conn, ()) =
        spawn_connection_after(stream, addr, CodeWidth::Four, &ctx.cancel, handler, |conn| {
            peer.attach(SocketRole::Control, conn.clone())
        });
    info!(peer = %username, %addr, conn = conn.id(), "control socket attached");
    conn
}

/// Read-side of a peer control socket.
struct ControlHandler {
    ctx: Arc<SessionContext>,
    peer: Arc<Peer>,
    permit: Mutex<Option<AdmissionPermit>>,
}

impl FrameHandler for ControlHandler {
    fn on_frame(&self, conn: &Connection, frame: Frame) {
        match self
            .ctx
            .peer_dispatch
            .dispatch(&frame, &self.ctx.notifier, self.peer.username())
        {
            Ok(true) => {}
            Ok(false) => {
                trace!(peer = %self.peer.username(), code = frame.code, "unhandled peer message");
            }
            Err(e) => {
                debug!(peer = %self.peer.username(), conn = conn.id(), code = frame.code, "bad peer message: {e}");
            }
        }
    }

    fn on_close(&self, conn: &Connection) {
        if self.peer.detach(SocketRole::Control, conn.id()) {
            debug!(peer = %self.peer.username(), "control socket closed");
        }
        self.permit.lock().take();
    }
}
