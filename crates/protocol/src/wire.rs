//! Primitive field encoding shared by every message.
//!
//! # Wire format
//!
//! ```text
//! u8, u32, u64, i32   little-endian
//! bool                1 byte, 0 or 1
//! string              [4 bytes LE: len][len bytes]
//! ipv4                [4 bytes LE] holding the big-endian address value
//! list<T>             [4 bytes LE: count][count x T]
//! ```

use std::net::Ipv4Addr;

use crate::error::ProtocolError;

/// Growable payload builder.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }

    pub fn str(&mut self, v: &str) -> &mut Self {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    pub fn ip(&mut self, v: Ipv4Addr) -> &mut Self {
        self.u32(u32::from(v))
    }

    /// Appends raw bytes with no length prefix.
    pub fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Writes a counted list.
    pub fn list<T>(&mut self, items: &[T], mut f: impl FnMut(&mut Self, &T)) -> &mut Self {
        self.u32(items.len() as u32);
        for item in items {
            f(self, item);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a single message payload.
///
/// Every read is bounds-checked against the payload; running past the end
/// yields [`ProtocolError::SizeMismatch`].
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(ProtocolError::SizeMismatch {
                declared: self.buf.len(),
                needed: self.pos.saturating_add(n),
            }),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.u8()? != 0)
    }

    /// Reads a length-prefixed string. Invalid UTF-8 is replaced rather
    /// than rejected; older clients send Latin-1 file names.
    pub fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        Ok(match std::str::from_utf8(bytes) {
            Ok(s) => s.to_owned(),
            Err(_) => String::from_utf8_lossy(bytes).into_owned(),
        })
    }

    pub fn ip(&mut self) -> Result<Ipv4Addr, ProtocolError> {
        Ok(Ipv4Addr::from(self.u32()?))
    }

    /// Reads a counted list.
    pub fn list<T>(
        &mut self,
        mut f: impl FnMut(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<Vec<T>, ProtocolError> {
        let count = self.u32()? as usize;
        // Each element takes at least one byte; cap the preallocation.
        let mut out = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            out.push(f(self)?);
        }
        Ok(out)
    }

    /// Reads a counted list that older peers omit entirely.
    ///
    /// An exhausted payload decodes as an empty list.
    pub fn optional_list<T>(
        &mut self,
        f: impl FnMut(&mut Self) -> Result<T, ProtocolError>,
    ) -> Result<Vec<T>, ProtocolError> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        self.list(f)
    }

    /// Decodes an optional trailing section with `f`.
    ///
    /// A section cut off by the end of the payload, even part way through
    /// an element, decodes as empty and consumes the rest. Other errors
    /// are returned as is.
    pub fn trailing<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<Vec<T>, ProtocolError>,
    ) -> Result<Vec<T>, ProtocolError> {
        let mut attempt = self.clone();
        match f(&mut attempt) {
            Ok(items) => {
                *self = attempt;
                Ok(items)
            }
            Err(ProtocolError::SizeMismatch { .. }) => {
                self.rest();
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Consumes and returns everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails if any payload bytes were left unread.
    pub fn finish(&self, code: u32) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(ProtocolError::TrailingBytes { code, remaining }),
        }
    }
}
