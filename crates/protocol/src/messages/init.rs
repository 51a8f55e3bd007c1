//! Connection handshake messages (1-byte codes).
//!
//! Exactly one of these is the first frame on every peer socket.

use super::Message;
use crate::constants::{CodeWidth, ConnectionType};
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::token::Token;
use crate::wire::{Reader, Writer};

/// Redeems a token handed out through an indirect connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PierceFirewall {
    pub token: Token,
}

impl Message for PierceFirewall {
    const CODE: u32 = 0;
    const WIDTH: CodeWidth = CodeWidth::One;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.u32(self.token.get());
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            token: Token(r.u32()?),
        })
    }
}

/// Names the dialing user and the role the socket will serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInit {
    pub username: String,
    pub conn_type: ConnectionType,
    pub token: Token,
}

impl Message for PeerInit {
    const CODE: u32 = 1;
    const WIDTH: CodeWidth = CodeWidth::One;

    fn encode_payload(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        w.str(&self.username)
            .str(self.conn_type.as_str())
            .u32(self.token.get());
        Ok(())
    }

    fn decode_payload(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let username = r.string()?;
        let raw = r.string()?;
        let conn_type = ConnectionType::parse(&raw).ok_or_else(|| {
            ProtocolError::invalid("connection type", format!("unknown type {raw:?}"))
        })?;
        Ok(Self {
            username,
            conn_type,
            token: Token(r.u32()?),
        })
    }
}

/// Either handshake frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitMessage {
    PierceFirewall(PierceFirewall),
    PeerInit(PeerInit),
}

impl InitMessage {
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.code {
            PierceFirewall::CODE => PierceFirewall::from_frame(frame).map(Self::PierceFirewall),
            PeerInit::CODE => PeerInit::from_frame(frame).map(Self::PeerInit),
            other => Err(ProtocolError::invalid(
                "handshake code",
                format!("unexpected code {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_init_wire_layout() {
        let bytes = PeerInit {
            username: "a".into(),
            conn_type: ConnectionType::Peer,
            token: Token(7),
        }
        .to_bytes()
        .unwrap();
        assert_eq!(
            bytes,
            vec![
                15, 0, 0, 0, // length
                1, // code
                1, 0, 0, 0, b'a', // username
                1, 0, 0, 0, b'P', // type
                7, 0, 0, 0, // token
            ]
        );
    }

    #[test]
    fn init_message_dispatch() {
        let frame = PierceFirewall { token: Token(99) }.to_frame().unwrap();
        assert_eq!(
            InitMessage::from_frame(&frame).unwrap(),
            InitMessage::PierceFirewall(PierceFirewall { token: Token(99) })
        );

        let frame = Frame::new(5, vec![]);
        assert!(InitMessage::from_frame(&frame).is_err());
    }

    #[test]
    fn unknown_connection_type() {
        let mut w = Writer::new();
        w.str("a").str("Q").u32(0);
        let frame = Frame::new(1, w.into_inner());
        assert!(matches!(
            PeerInit::from_frame(&frame),
            Err(ProtocolError::InvalidField { .. })
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_peer_init(username in ".*", token in any::<u32>(), kind in 0u8..3) {
                let conn_type = match kind {
                    0 => ConnectionType::Peer,
                    1 => ConnectionType::File,
                    _ => ConnectionType::Distributed,
                };
                let msg = PeerInit { username, conn_type, token: Token(token) };
                let frame = msg.to_frame().unwrap();
                prop_assert_eq!(InitMessage::from_frame(&frame).unwrap(), InitMessage::PeerInit(msg));
            }

            #[test]
            fn prop_pierce(token in any::<u32>()) {
                let msg = PierceFirewall { token: Token(token) };
                prop_assert_eq!(PierceFirewall::from_frame(&msg.to_frame().unwrap()).unwrap(), msg);
            }
        }
    }
}
