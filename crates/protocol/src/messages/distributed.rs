//! Distributed relay messages (1-byte codes).

use super::Message;
use crate::constants::CodeWidth;
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::token::Token;
use crate::wire::{Reader, Writer};

const W: CodeWidth = CodeWidth::One;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedPing;

impl Message for DistributedPing {
    const CODE: u32 = 0;
    const WIDTH: CodeWidth = W;
    // Older clients append a token.
    const LENIENT: bool = true;

    fn encode_payload(&self, _w: &mut Writer) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn decode_payload(_r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(DistributedPing)
    }
}

/// A search travelling down the relay tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedSearch {
    pub unknown: u32,
    pub username: String,
    pub token: Token,
    pub query: String,
}

impl Message for DistributedSearch {
    const CODE: u32 = 3;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.unknown)
            .str(&self.username)
            .u32(self.token.get())
            .str(&self.query);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            unknown: r.u32()?,
            username: r.string()?,
            token: Token(r.u32()?),
            query: r.string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedBranchLevel {
    pub level: u32,
}

impl Message for DistributedBranchLevel {
    const CODE: u32 = 4;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.level);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { level: r.u32()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedBranchRoot {
    pub root: String,
}

impl Message for DistributedBranchRoot {
    const CODE: u32 = 5;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.root);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { root: r.string()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributedChildDepth {
    pub depth: u32,
}

impl Message for DistributedChildDepth {
    const CODE: u32 = 7;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.depth);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { depth: r.u32()? })
    }
}

/// A branch root forwarding a message the server embedded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedEmbeddedMessage {
    pub distributed_code: u8,
    pub payload: Vec<u8>,
}

impl DistributedEmbeddedMessage {
    /// The wrapped distributed frame.
    pub fn inner_frame(&self) -> Frame {
        Frame::new(u32::from(self.distributed_code), self.payload.clone())
    }
}

impl Message for DistributedEmbeddedMessage {
    const CODE: u32 = 93;
    const WIDTH: CodeWidth = W;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u8(self.distributed_code).raw(&self.payload);
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            distributed_code: r.u8()?,
            payload: r.rest().to_vec(),
        })
    }
}
