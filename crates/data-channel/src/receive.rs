//! Download direction: pull a file off an accepted file-data socket.
//!
//! The caller has already read the uploader's token and matched it to a
//! negotiated transfer. We ask for the whole file (offset 0), truncate the
//! destination, and copy exactly the negotiated size.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DataChannelError;
use crate::wire::write_offset;
use crate::TCP_BUFFER_SIZE;

/// Receives `expected_size` bytes from `stream` into `dest`.
///
/// Each read must make progress within `idle_timeout`. Progress (bytes so
/// far) is reported without blocking. Returns the number of bytes written.
pub async fn receive_file<S>(
    stream: &mut S,
    dest: &Path,
    expected_size: u64,
    idle_timeout: Duration,
    cancel: &CancellationToken,
    progress: Option<&mpsc::Sender<u64>>,
) -> Result<u64, DataChannelError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_offset(stream, 0).await?;

    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::File::create(dest).await?;
    let mut file = BufWriter::with_capacity(TCP_BUFFER_SIZE, file);

    let mut buf = vec![0u8; TCP_BUFFER_SIZE];
    let mut received: u64 = 0;

    while received < expected_size {
        let to_read = ((expected_size - received) as usize).min(buf.len());
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DataChannelError::Cancelled);
            }
            result = tokio::time::timeout(idle_timeout, stream.read(&mut buf[..to_read])) => {
                match result {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(DataChannelError::Timeout),
                }
            }
        };
        if n == 0 {
            file.flush().await?;
            return Err(DataChannelError::Incomplete {
                received,
                expected: expected_size,
            });
        }

        file.write_all(&buf[..n]).await?;
        received += n as u64;

        if let Some(tx) = progress {
            let _ = tx.try_send(received);
        }
    }

    file.flush().await?;
    debug!(path = %dest.display(), bytes = received, "file data received");
    info!(bytes = received, "download stream complete");
    Ok(received)
}

/// Derives a safe local file name from a peer's remote path.
///
/// Remote paths use backslashes (`@@share\Artist\track.mp3`); only the
/// last component is kept.
pub fn local_file_name(remote_path: &str) -> Result<String, DataChannelError> {
    let name = remote_path
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() {
        return Err(DataChannelError::InvalidPath(format!(
            "no file name in {remote_path:?}"
        )));
    }
    if name == "." || name == ".." {
        return Err(DataChannelError::InvalidPath(format!(
            "parent traversal not allowed: {remote_path}"
        )));
    }
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(DataChannelError::InvalidPath(format!(
            "drive prefix not allowed: {remote_path}"
        )));
    }
    Ok(name.to_owned())
}
