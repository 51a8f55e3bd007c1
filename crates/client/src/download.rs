//! Downloading one file from a peer.
//!
//! We ask the peer to queue the file. When its slot frees up it opens
//! negotiation with a `TransferRequest` (direction upload) carrying its own
//! token; we accept, and it connects a raw file socket that starts with
//! that token. Progress is published as [`DownloadEvent`]s.

use std::path::PathBuf;
use std::sync::Arc;

use slsk_data_channel::receive_file;
use slsk_protocol::messages::peer::{
    QueueUpload, TransferRequest, TransferResponse, UploadDenied, UploadFailed,
};
use slsk_protocol::{Token, TransferDirection, TransferRejection};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::context::{SessionContext, bounded};
use crate::error::ClientError;
use crate::events::{DownloadEvent, DownloadState, FromPeer};

/// What to fetch and where to put it.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub username: String,
    /// Our handle for the download; tags every event.
    pub token: Token,
    pub filename: String,
    pub size: u64,
    pub dest: PathBuf,
}

impl DownloadRequest {
    fn event(&self, state: DownloadState) -> DownloadEvent {
        DownloadEvent {
            token: self.token,
            username: self.username.clone(),
            filename: self.filename.clone(),
            state,
        }
    }
}

/// Runs a download to completion, publishing its progress.
pub(crate) async fn download(
    ctx: &Arc<SessionContext>,
    req: DownloadRequest,
) -> Result<u64, ClientError> {
    let result = run(ctx, &req).await;
    let state = match &result {
        Ok(bytes) => DownloadState::Complete { bytes: *bytes },
        Err(e) => DownloadState::Failed {
            reason: e.to_string(),
        },
    };
    ctx.notifier.publish(req.event(state));
    result
}

async fn run(ctx: &Arc<SessionContext>, req: &DownloadRequest) -> Result<u64, ClientError> {
    let peer = ctx
        .peers
        .get(&req.username)
        .ok_or_else(|| ClientError::UnknownPeer(req.username.clone()))?;
    let control = peer
        .control()
        .ok_or_else(|| ClientError::NoControlSocket(req.username.clone()))?;

    let mut offers = ctx.notifier.subscribe::<FromPeer<TransferRequest>>();
    let mut denials = ctx.notifier.subscribe::<FromPeer<UploadDenied>>();
    let mut failures = ctx.notifier.subscribe::<FromPeer<UploadFailed>>();

    control
        .send(&QueueUpload {
            filename: req.filename.clone(),
        })
        .await?;
    ctx.notifier.publish(req.event(DownloadState::Queued));
    debug!(peer = %req.username, file = %req.filename, "upload queued");

    let offer = bounded(
        &ctx.cancel,
        ctx.config.transfer_timeout(),
        "transfer request",
        async {
            loop {
                tokio::select! {
                    Some(m) = offers.recv() => {
                        if m.username == req.username
                            && m.message.filename == req.filename
                            && m.message.direction == TransferDirection::Upload
                        {
                            return Ok(m.message);
                        }
                    }
                    Some(m) = denials.recv() => {
                        if m.username == req.username && m.message.filename == req.filename {
                            return Err(ClientError::TransferRejected(m.message.reason));
                        }
                    }
                    Some(m) = failures.recv() => {
                        if m.username == req.username && m.message.filename == req.filename {
                            return Err(ClientError::TransferRejected(TransferRejection::Other(
                                "upload failed".into(),
                            )));
                        }
                    }
                    else => return Err(ClientError::Closed),
                }
            }
        },
    )
    .await?;

    if let Some(size) = offer.size
        && size != req.size
    {
        warn!(peer = %req.username, file = %req.filename, expected = req.size, offered = size, "peer offers a different size");
    }

    // Register before accepting: the peer may connect as soon as it reads
    // our answer.
    let socket = ctx.files.expect(&req.username, offer.token);
    if let Err(e) = control.send(&TransferResponse::allowed(offer.token)).await {
        ctx.files.cancel(&req.username, offer.token);
        return Err(e);
    }
    ctx.notifier.publish(req.event(DownloadState::Accepted));

    let stream = bounded(
        &ctx.cancel,
        ctx.config.transfer_timeout(),
        "file socket",
        async { socket.await.map_err(|_| ClientError::Closed) },
    )
    .await;
    let mut stream: TcpStream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            ctx.files.cancel(&req.username, offer.token);
            return Err(e);
        }
    };
    ctx.notifier.publish(req.event(DownloadState::Streaming));
    info!(peer = %req.username, file = %req.filename, token = %offer.token, "download started");

    let bytes = receive_file(
        &mut stream,
        &req.dest,
        req.size,
        ctx.config.transfer_timeout(),
        &ctx.cancel,
        None,
    )
    .await?;
    info!(peer = %req.username, file = %req.filename, bytes, dest = %req.dest.display(), "download complete");
    Ok(bytes)
}
