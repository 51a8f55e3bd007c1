//! Typed message catalogue.
//!
//! Each message type knows its code, the code width of the socket it
//! travels on, and how to turn its payload into bytes and back. Decoding
//! is strict: a frame with a different code is [`ProtocolError::CodeMismatch`],
//! and leftover payload bytes are [`ProtocolError::TrailingBytes`] unless the
//! message tolerates fields added by newer servers.

pub mod distributed;
pub mod init;
pub mod peer;
pub mod server;

use crate::constants::CodeWidth;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::wire::{Reader, Writer};

/// A message with a fixed code on a fixed kind of socket.
pub trait Message: Sized {
    const CODE: u32;
    const WIDTH: CodeWidth;

    /// Accept (and ignore) payload bytes left after the known fields.
    const LENIENT: bool = false;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError>;

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError>;

    fn to_frame(&self) -> Result<Frame, ProtocolError> {
        let mut w = Writer::new();
        self.encode_payload(&mut w)?;
        Ok(Frame::new(Self::CODE, w.into_inner()))
    }

    /// Encodes the complete frame, length prefix included.
    fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(self.to_frame()?.encode(Self::WIDTH))
    }

    fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        if frame.code != Self::CODE {
            return Err(ProtocolError::CodeMismatch {
                expected: Self::CODE,
                got: frame.code,
            });
        }
        let mut r = Reader::new(&frame.payload);
        let msg = Self::decode_payload(&mut r)?;
        if !Self::LENIENT {
            r.finish(Self::CODE)?;
        }
        Ok(msg)
    }
}

/// Implements [`Message`] for a payload-less unit struct.
macro_rules! empty_message {
    ($ty:ident, $code:expr, $width:expr) => {
        impl $crate::messages::Message for $ty {
            const CODE: u32 = $code;
            const WIDTH: $crate::constants::CodeWidth = $width;

            fn encode_payload(
                &self,
                _w: &mut $crate::wire::Writer,
            ) -> Result<(), $crate::error::ProtocolError> {
                Ok(())
            }

            fn decode_payload(
                _r: &mut $crate::wire::Reader<'_>,
            ) -> Result<Self, $crate::error::ProtocolError> {
                Ok($ty)
            }
        }
    };
}

pub(crate) use empty_message;
