//! Length-prefixed frame codec.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes LE: length][1 or 4 bytes LE: code][length - code_len bytes: payload]
//! ```
//!
//! `length` counts everything after itself, including the code. A frame
//! whose length is zero is the closest thing the protocol has to a close
//! message and is reported as end-of-stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{CodeWidth, MAX_FRAME_SIZE};
use crate::error::ProtocolError;

/// One decoded frame: message code plus the raw payload after the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(code: u32, payload: Vec<u8>) -> Self {
        Self { code, payload }
    }

    /// Encodes the frame with the given code width.
    pub fn encode(&self, width: CodeWidth) -> Vec<u8> {
        encode_frame(width, self.code, &self.payload)
    }

    /// Total encoded size, length prefix included.
    pub fn encoded_len(&self, width: CodeWidth) -> usize {
        4 + width.len() + self.payload.len()
    }
}

/// Prepends the length prefix and the role-appropriate code.
pub fn encode_frame(width: CodeWidth, code: u32, payload: &[u8]) -> Vec<u8> {
    let length = width.len() + payload.len();
    let mut buf = Vec::with_capacity(4 + length);
    buf.extend_from_slice(&(length as u32).to_le_bytes());
    match width {
        CodeWidth::One => {
            debug_assert!(code <= u8::MAX as u32, "code {code} does not fit one byte");
            buf.push(code as u8);
        }
        CodeWidth::Four => buf.extend_from_slice(&code.to_le_bytes()),
    }
    buf.extend_from_slice(payload);
    buf
}

/// Decodes one complete frame held in `buf`.
///
/// The declared length must account for exactly the bytes after the
/// prefix.
pub fn decode_frame(buf: &[u8], width: CodeWidth) -> Result<Frame, ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::ShortFrame {
            expected: 4,
            got: buf.len(),
        });
    }
    let declared = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let body = &buf[4..];
    if body.len() < declared {
        return Err(ProtocolError::ShortFrame {
            expected: declared,
            got: body.len(),
        });
    }
    if body.len() > declared {
        return Err(ProtocolError::SizeMismatch {
            declared,
            needed: body.len(),
        });
    }
    split_code(body.to_vec(), width)
}

/// Reads exactly one frame.
///
/// Returns `Ok(None)` on a clean end of stream: EOF on a frame boundary,
/// or a zero-length frame. EOF inside a frame is [`ProtocolError::ShortFrame`].
pub async fn read_frame<R>(reader: &mut R, width: CodeWidth) -> Result<Option<Frame>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let got = read_full(reader, &mut len_buf).await?;
    if got == 0 {
        return Ok(None);
    }
    if got < len_buf.len() {
        return Err(ProtocolError::ShortFrame { expected: 4, got });
    }

    let declared = u32::from_le_bytes(len_buf) as usize;
    if declared == 0 {
        return Ok(None);
    }
    if declared > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(declared));
    }
    if declared < width.len() {
        return Err(ProtocolError::SizeMismatch {
            declared,
            needed: width.len(),
        });
    }

    let mut body = vec![0u8; declared];
    let got = read_full(reader, &mut body).await?;
    if got < declared {
        return Err(ProtocolError::ShortFrame {
            expected: declared,
            got,
        });
    }

    split_code(body, width).map(Some)
}

/// Writes an already encoded frame and flushes.
pub async fn write_frame<W>(writer: &mut W, width: CodeWidth, frame: &Frame) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode(width)).await?;
    writer.flush().await?;
    Ok(())
}

fn split_code(mut body: Vec<u8>, width: CodeWidth) -> Result<Frame, ProtocolError> {
    let code = match width {
        CodeWidth::One => body.first().map(|&c| u32::from(c)),
        CodeWidth::Four => body
            .get(..4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    }
    .ok_or(ProtocolError::SizeMismatch {
        declared: body.len(),
        needed: width.len(),
    })?;
    body.drain(..width.len());
    Ok(Frame {
        code,
        payload: body,
    })
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
