//! Zlib wrapping for listing-style payloads.
//!
//! Shared file lists, folder contents and search responses carry their
//! body as a zlib stream after the message code.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::constants::MAX_FRAME_SIZE;
use crate::error::ProtocolError;

/// Largest body a zlib payload may inflate to.
pub const MAX_INFLATED_SIZE: usize = MAX_FRAME_SIZE;

/// Compresses a payload body.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(ProtocolError::Decompress)?;
    encoder.finish().map_err(ProtocolError::Decompress)
}

/// Decompresses a payload body.
///
/// A stream cut short at EOF yields whatever was inflated before the cut,
/// so optional trailing collections simply come out empty. Corrupt data
/// that produces nothing at all is still an error. Output larger than
/// [`MAX_INFLATED_SIZE`] is rejected with [`ProtocolError::FrameTooLarge`].
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    inflate_limited(data, MAX_INFLATED_SIZE)
}

fn inflate_limited(data: &[u8], limit: usize) -> Result<Vec<u8>, ProtocolError> {
    // One byte past the limit is enough to tell an oversized body apart.
    let mut decoder = ZlibDecoder::new(data).take(limit as u64 + 1);
    let mut out = Vec::with_capacity(data.len().saturating_mul(2).min(limit));
    let mut chunk = [0u8; 16 * 1024];
    loop {
        match decoder.read(&mut chunk) {
            Ok(0) => return Ok(out),
            Ok(n) => {
                out.extend_from_slice(&chunk[..n]);
                if out.len() > limit {
                    return Err(ProtocolError::FrameTooLarge(out.len()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && !out.is_empty() => {
                return Ok(out);
            }
            Err(e) => return Err(ProtocolError::Decompress(e)),
        }
    }
}
