//! Code-to-decoder registry.
//!
//! A socket's read pump looks the frame code up here, decodes the matching
//! message type and publishes it. Adding a message to a socket kind means
//! registering one more type, not editing a match.
//!
//! [`Dispatcher`] publishes what it decodes. [`Router`] is the same table
//! for sockets whose messages act on the socket itself (the distributed
//! parent and children), so its routes also get the handler and the
//! connection the frame arrived on.

use std::collections::HashMap;

use slsk_notify::Notifier;
use slsk_protocol::messages::{peer, server};
use slsk_protocol::{CodeWidth, Frame, Message, ProtocolError};

use crate::connection::Connection;
use crate::events::FromPeer;

type DecodeFn = Box<dyn Fn(&Frame, &Notifier, &str) -> Result<(), ProtocolError> + Send + Sync>;

/// Maps message codes of one socket kind to decode-and-publish functions.
pub struct Dispatcher {
    width: CodeWidth,
    decoders: HashMap<u32, DecodeFn>,
}

impl Dispatcher {
    pub fn new(width: CodeWidth) -> Self {
        Self {
            width,
            decoders: HashMap::new(),
        }
    }

    pub fn width(&self) -> CodeWidth {
        self.width
    }

    /// Registers `M`, published as itself.
    pub fn register<M>(&mut self) -> &mut Self
    where
        M: Message + Clone + Send + 'static,
    {
        debug_assert_eq!(M::WIDTH, self.width);
        self.decoders.insert(
            M::CODE,
            Box::new(|frame, notifier, _origin| {
                notifier.publish(M::from_frame(frame)?);
                Ok(())
            }),
        );
        self
    }

    /// Registers `M`, published as [`FromPeer<M>`] tagged with the socket's
    /// owner.
    pub fn register_from_peer<M>(&mut self) -> &mut Self
    where
        M: Message + Clone + Send + 'static,
    {
        debug_assert_eq!(M::WIDTH, self.width);
        self.decoders.insert(
            M::CODE,
            Box::new(|frame, notifier, origin| {
                notifier.publish(FromPeer {
                    username: origin.to_owned(),
                    message: M::from_frame(frame)?,
                });
                Ok(())
            }),
        );
        self
    }

    pub fn handles(&self, code: u32) -> bool {
        self.decoders.contains_key(&code)
    }

    /// Decodes and publishes `frame`.
    ///
    /// Returns `Ok(false)` when no decoder is registered for the code.
    pub fn dispatch(
        &self,
        frame: &Frame,
        notifier: &Notifier,
        origin: &str,
    ) -> Result<bool, ProtocolError> {
        match self.decoders.get(&frame.code) {
            Some(decode) => decode(frame, notifier, origin).map(|()| true),
            None => Ok(false),
        }
    }

    /// Messages the directory server sends us.
    pub fn server() -> Self {
        let mut d = Self::new(CodeWidth::Four);
        d.register::<server::LoginResponse>()
            .register::<server::GetPeerAddressResponse>()
            .register::<server::WatchUserResponse>()
            .register::<server::GetUserStatusResponse>()
            .register::<server::ConnectToPeerResponse>()
            .register::<server::GetUserStatsResponse>()
            .register::<server::RoomList>()
            .register::<server::PrivilegedUsers>()
            .register::<server::ParentMinSpeed>()
            .register::<server::ParentSpeedRatio>()
            .register::<server::CheckPrivilegesResponse>()
            .register::<server::EmbeddedMessage>()
            .register::<server::PossibleParents>()
            .register::<server::WishlistInterval>()
            .register::<server::ExcludedSearchPhrases>()
            .register::<server::CantConnectToPeerResponse>();
        d
    }

    /// Messages a peer sends on its control socket.
    pub fn peer() -> Self {
        let mut d = Self::new(CodeWidth::Four);
        d.register_from_peer::<peer::SharedFileListRequest>()
            .register_from_peer::<peer::SharedFileListResponse>()
            .register_from_peer::<peer::FileSearchResponse>()
            .register_from_peer::<peer::FolderContentsRequest>()
            .register_from_peer::<peer::FolderContentsResponse>()
            .register_from_peer::<peer::TransferRequest>()
            .register_from_peer::<peer::TransferResponse>()
            .register_from_peer::<peer::QueueUpload>()
            .register_from_peer::<peer::PlaceInQueueResponse>()
            .register_from_peer::<peer::UploadFailed>()
            .register_from_peer::<peer::UploadDenied>()
            .register_from_peer::<peer::PlaceInQueueRequest>();
        d
    }
}

type RouteFn<H> =
    Box<dyn Fn(&H, &Connection, &Frame) -> Result<(), ProtocolError> + Send + Sync>;

/// Maps message codes of one socket kind to routes on a handler `H`.
pub struct Router<H> {
    width: CodeWidth,
    routes: HashMap<u32, RouteFn<H>>,
}

impl<H> Router<H> {
    pub fn new(width: CodeWidth) -> Self {
        Self {
            width,
            routes: HashMap::new(),
        }
    }

    /// Routes `M`, decoded.
    pub fn on<M>(&mut self, f: impl Fn(&H, &Connection, M) + Send + Sync + 'static) -> &mut Self
    where
        M: Message + 'static,
    {
        debug_assert_eq!(M::WIDTH, self.width);
        self.routes.insert(
            M::CODE,
            Box::new(move |handler, conn, frame| {
                f(handler, conn, M::from_frame(frame)?);
                Ok(())
            }),
        );
        self
    }

    /// Routes frames carrying `M`'s code without decoding them.
    pub fn on_frame<M>(
        &mut self,
        f: impl Fn(&H, &Connection, &Frame) + Send + Sync + 'static,
    ) -> &mut Self
    where
        M: Message,
    {
        debug_assert_eq!(M::WIDTH, self.width);
        self.routes.insert(
            M::CODE,
            Box::new(move |handler, conn, frame| {
                f(handler, conn, frame);
                Ok(())
            }),
        );
        self
    }

    /// Accepts `M` and does nothing with it.
    pub fn ignore<M: Message>(&mut self) -> &mut Self {
        self.on_frame::<M>(|_, _, _| {})
    }

    pub fn handles(&self, code: u32) -> bool {
        self.routes.contains_key(&code)
    }

    /// Runs the route for `frame`.
    ///
    /// Returns `Ok(false)` when no route is registered for the code.
    pub fn route(
        &self,
        handler: &H,
        conn: &Connection,
        frame: &Frame,
    ) -> Result<bool, ProtocolError> {
        match self.routes.get(&frame.code) {
            Some(route) => route(handler, conn, frame).map(|()| true),
            None => Ok(false),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<_> = self.decoders.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("width", &self.width)
            .field("codes", &codes)
            .finish()
    }
}
