//! Upload direction: stream a local file to a downloader.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use slsk_protocol::Token;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DataChannelError;
use crate::wire::{read_offset, write_token};
use crate::TCP_BUFFER_SIZE;

/// Sends `source` over a freshly opened file-data socket.
///
/// Writes `token`, waits up to `idle_timeout` for the downloader's resume
/// offset, then streams the file from that offset to its end. Returns the
/// number of bytes sent.
pub async fn send_file<S>(
    stream: &mut S,
    token: Token,
    source: &Path,
    idle_timeout: Duration,
    cancel: &CancellationToken,
    progress: Option<&mpsc::Sender<u64>>,
) -> Result<u64, DataChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut file = tokio::fs::File::open(source).await?;
    let file_size = file.metadata().await?.len();

    write_token(stream, token).await?;

    let offset = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(DataChannelError::Cancelled);
        }
        result = tokio::time::timeout(idle_timeout, read_offset(stream)) => {
            match result {
                Ok(Ok(o)) => o,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(DataChannelError::Timeout),
            }
        }
    };
    if offset > file_size {
        return Err(DataChannelError::Protocol(format!(
            "offset {offset} beyond file size {file_size}"
        )));
    }
    file.seek(SeekFrom::Start(offset)).await?;
    debug!(%token, offset, file_size, "upload stream starting");

    let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, stream);
    let mut buf = vec![0u8; TCP_BUFFER_SIZE];
    let mut remaining = file_size - offset;
    let mut sent: u64 = 0;

    while remaining > 0 {
        if cancel.is_cancelled() {
            return Err(DataChannelError::Cancelled);
        }

        let to_read = (remaining as usize).min(buf.len());
        let n = file.read(&mut buf[..to_read]).await?;
        if n == 0 {
            return Err(DataChannelError::Protocol(
                "unexpected EOF reading local file".into(),
            ));
        }

        match tokio::time::timeout(idle_timeout, writer.write_all(&buf[..n])).await {
            Ok(res) => res?,
            Err(_) => return Err(DataChannelError::Timeout),
        }
        remaining -= n as u64;
        sent += n as u64;

        if let Some(tx) = progress {
            let _ = tx.try_send(sent);
        }
    }

    writer.flush().await?;
    info!(%token, bytes = sent, "upload stream complete");
    Ok(sent)
}
