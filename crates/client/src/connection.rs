//! Framed socket management: read/write pumps and send buffering.
//!
//! Every framed socket (server, peer control, distributed) runs two tasks.
//! The write pump drains a bounded queue of encoded frames; the read pump
//! decodes frames in arrival order and hands each one to a
//! [`FrameHandler`]. When the read pump ends, for whatever reason, the
//! connection is cancelled and the handler's `on_close` runs exactly once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use slsk_protocol::{CodeWidth, Frame, Message, read_frame};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ClientError;

/// Outbound queue capacity per socket.
pub const SEND_BUFFER_SIZE: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Receives decoded frames from a connection's read pump.
///
/// Calls happen on the read pump itself, in arrival order, so
/// implementations must not block: publish, relay with `try_send`, or spawn.
pub trait FrameHandler: Send + Sync + 'static {
    fn on_frame(&self, conn: &Connection, frame: Frame);

    /// Called once after the read pump has stopped.
    fn on_close(&self, _conn: &Connection) {}
}

/// Handle for queueing frames on a connection.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<Vec<u8>>,
    width: CodeWidth,
}

impl Sender {
    /// Encodes and queues `msg`, waiting for buffer space.
    pub async fn send<M: Message>(&self, msg: &M) -> Result<(), ClientError> {
        debug_assert_eq!(M::WIDTH, self.width, "message sent on wrong socket kind");
        let bytes = msg.to_bytes()?;
        self.tx.send(bytes).await.map_err(|_| ClientError::Closed)
    }

    /// Encodes and queues `msg` without waiting; fails if the buffer is
    /// full or the connection is gone.
    pub fn try_send<M: Message>(&self, msg: &M) -> Result<(), ClientError> {
        debug_assert_eq!(M::WIDTH, self.width, "message sent on wrong socket kind");
        let bytes = msg.to_bytes()?;
        self.try_send_raw(bytes)
    }

    /// Queues already encoded bytes without waiting.
    pub fn try_send_raw(&self, bytes: Vec<u8>) -> Result<(), ClientError> {
        self.tx.try_send(bytes).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!("send buffer full, dropping frame");
                ClientError::Closed
            }
            TrySendError::Closed(_) => ClientError::Closed,
        })
    }

    /// Returns `true` if the write pump is still draining the queue.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// A live framed socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    remote: SocketAddr,
    sender: Sender,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl Connection {
    /// Process-unique identifier, used to tell a replaced socket from its
    /// successor.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote
    }

    pub fn width(&self) -> CodeWidth {
        self.inner.sender.width
    }

    pub fn sender(&self) -> &Sender {
        &self.inner.sender
    }

    pub async fn send<M: Message>(&self, msg: &M) -> Result<(), ClientError> {
        self.inner.sender.send(msg).await
    }

    pub fn try_send<M: Message>(&self, msg: &M) -> Result<(), ClientError> {
        self.inner.sender.try_send(msg)
    }

    /// Signals both pumps to stop.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Waits until the read pump has stopped and `on_close` has run.
    pub async fn closed(&self) {
        self.inner.finished.cancelled().await;
    }

    /// Signals shutdown and waits for the handler to observe it.
    pub async fn close_and_wait(&self) {
        self.close();
        self.closed().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Runs the read and write pumps for a framed socket.
///
/// The pumps stop when the peer closes, on any framing or transport error,
/// when [`Connection::close`] is called, or when `parent` is cancelled.
pub fn spawn_connection<S>(
    stream: S,
    remote: SocketAddr,
    width: CodeWidth,
    parent: &CancellationToken,
    handler: Arc<dyn FrameHandler>,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    spawn_connection_after(stream, remote, width, parent, handler, |_| ()).0
}

/// Like [`spawn_connection`], but runs `install` on the new handle before
/// either pump starts.
///
/// Used to put a socket into its slot, closing whatever held the slot
/// before, so no frame of the new socket is handled while the old one is
/// still live.
pub(crate) fn spawn_connection_after<S, T>(
    stream: S,
    remote: SocketAddr,
    width: CodeWidth,
    parent: &CancellationToken,
    handler: Arc<dyn FrameHandler>,
    install: impl FnOnce(&Connection) -> T,
) -> (Connection, T)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Vec<u8>>(SEND_BUFFER_SIZE);
    let cancel = parent.child_token();
    let conn = Connection {
        inner: Arc::new(ConnectionInner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            sender: Sender { tx, width },
            cancel: cancel.clone(),
            finished: CancellationToken::new(),
        }),
    };

    let installed = install(&conn);
    let (reader, writer) = tokio::io::split(stream);

    tokio::spawn(write_pump(writer, rx, cancel.clone()));

    let read_conn = conn.clone();
    tokio::spawn(async move {
        read_pump(reader, &read_conn, handler.as_ref()).await;
        // When the read pump exits, stop the write pump too.
        cancel.cancel();
        handler.on_close(&read_conn);
        read_conn.inner.finished.cancel();
        debug!(conn = read_conn.id(), remote = %read_conn.remote_addr(), "connection closed");
    });

    (conn, installed)
}

/// Write pump: drains the send queue onto the socket.
async fn write_pump<W>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(bytes) => {
                        let result = async {
                            writer.write_all(&bytes).await?;
                            writer.flush().await
                        }
                        .await;
                        if let Err(e) = result {
                            debug!("write pump error: {e}");
                            break;
                        }
                    }
                    None => break, // All senders dropped.
                }
            }
        }
    }

    cancel.cancel();
    let _ = writer.shutdown().await;
}

/// Read pump: reads frames and dispatches them to the handler.
async fn read_pump<R>(mut reader: R, conn: &Connection, handler: &dyn FrameHandler)
where
    R: AsyncRead + Unpin,
{
    let cancel = conn.inner.cancel.clone();
    let width = conn.width();
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = read_frame(&mut reader, width) => result,
        };
        match result {
            Ok(Some(frame)) => {
                trace!(conn = conn.id(), code = frame.code, len = frame.payload.len(), "frame received");
                handler.on_frame(conn, frame);
            }
            Ok(None) => {
                debug!(conn = conn.id(), "remote closed the socket");
                break;
            }
            Err(e) => {
                warn!(conn = conn.id(), remote = %conn.remote_addr(), "read pump error: {e}");
                break;
            }
        }
    }
}
