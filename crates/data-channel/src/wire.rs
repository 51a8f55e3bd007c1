//! File-data socket preamble.
//!
//! # Wire format
//!
//! ```text
//! (after PeerInit "F" on the same socket)
//! TOKEN  (uploader -> downloader): [4 bytes LE: transfer token]
//! OFFSET (downloader -> uploader): [8 bytes LE: resume offset]
//! DATA   (uploader -> downloader): [size - offset raw bytes]
//! ```
//!
//! There is no length prefix or code anywhere on this socket.

use slsk_protocol::Token;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DataChannelError;

/// Writes the transfer token.
pub async fn write_token<W: AsyncWrite + Unpin>(
    writer: &mut W,
    token: Token,
) -> Result<(), DataChannelError> {
    writer.write_u32_le(token.get()).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the transfer token.
pub async fn read_token<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Token, DataChannelError> {
    Ok(Token(reader.read_u32_le().await?))
}

/// Writes the offset the downloader wants the stream to start at.
pub async fn write_offset<W: AsyncWrite + Unpin>(
    writer: &mut W,
    offset: u64,
) -> Result<(), DataChannelError> {
    writer.write_u64_le(offset).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the resume offset.
pub async fn read_offset<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64, DataChannelError> {
    Ok(reader.read_u64_le().await?)
}
