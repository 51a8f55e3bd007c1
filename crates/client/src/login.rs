//! Login handshake with the directory server.
//!
//! After the server accepts our credentials we announce ourselves with a
//! fixed sequence of messages, in an order the server relies on. The
//! server answers with a batch of unsolicited messages in no particular
//! order; login completes once all of them are in. Some servers never
//! answer the privilege check, so after a grace period with only that
//! reply missing we carry on assuming no privileges.

use std::net::Ipv4Addr;

use slsk_protocol::messages::server::{
    AcceptChildren, BranchLevel, BranchRoot, CheckPrivileges, CheckPrivilegesResponse,
    ExcludedSearchPhrases, HaveNoParent, Login, LoginResponse, ParentMinSpeed, ParentSpeedRatio,
    PrivilegedUsers, RoomList, SetStatus, SetWaitPort, SharedFoldersFiles, WatchUser,
    WatchUserResponse, WishlistInterval,
};
use slsk_protocol::{Room, UserStats, UserStatus};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::{SessionContext, bounded};
use crate::error::ClientError;

/// Everything the server told us while logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub greeting: String,
    /// Our address as the server sees it.
    pub own_ip: Ipv4Addr,
    pub is_supporter: bool,
    /// Seconds of privileges left.
    pub privileges_left: u32,
    /// The privilege check never came back; `privileges_left` is 0.
    pub privileges_assumed: bool,
    pub own_stats: UserStats,
    pub rooms: Vec<Room>,
    pub parent_min_speed: u32,
    pub parent_speed_ratio: u32,
    pub wishlist_interval: u32,
    pub privileged_users: Vec<String>,
    pub excluded_phrases: Vec<String>,
}

#[derive(Default)]
struct Replies {
    rooms: Option<Vec<Room>>,
    parent_min_speed: Option<u32>,
    parent_speed_ratio: Option<u32>,
    wishlist_interval: Option<u32>,
    privileged_users: Option<Vec<String>>,
    excluded_phrases: Option<Vec<String>>,
    own_stats: Option<UserStats>,
    privileges_left: Option<u32>,
}

impl Replies {
    fn missing(&self) -> Vec<&'static str> {
        let slots = [
            ("room list", self.rooms.is_none()),
            ("parent min speed", self.parent_min_speed.is_none()),
            ("parent speed ratio", self.parent_speed_ratio.is_none()),
            ("wishlist interval", self.wishlist_interval.is_none()),
            ("privileged users", self.privileged_users.is_none()),
            ("excluded search phrases", self.excluded_phrases.is_none()),
            ("own watch reply", self.own_stats.is_none()),
            ("privileges", self.privileges_left.is_none()),
        ];
        slots
            .into_iter()
            .filter_map(|(name, missing)| missing.then_some(name))
            .collect()
    }

    fn only_privileges_missing(&self) -> bool {
        self.missing() == ["privileges"]
    }
}

/// Runs the full login sequence over the session's server connection.
pub(crate) async fn login(ctx: &SessionContext) -> Result<LoginOutcome, ClientError> {
    // Every reply is subscribed before anything is sent; the server may
    // answer faster than we get to wait.
    let mut responses = ctx.notifier.subscribe::<LoginResponse>();
    let mut rooms = ctx.notifier.subscribe::<RoomList>();
    let mut min_speeds = ctx.notifier.subscribe::<ParentMinSpeed>();
    let mut ratios = ctx.notifier.subscribe::<ParentSpeedRatio>();
    let mut wishlists = ctx.notifier.subscribe::<WishlistInterval>();
    let mut privileged = ctx.notifier.subscribe::<PrivilegedUsers>();
    let mut excluded = ctx.notifier.subscribe::<ExcludedSearchPhrases>();
    let mut watches = ctx.notifier.subscribe::<WatchUserResponse>();
    let mut privileges = ctx.notifier.subscribe::<CheckPrivilegesResponse>();

    let credentials = Login {
        username: ctx.config.username.clone(),
        password: ctx.config.password.clone(),
        version: ctx.config.client_version,
        minor_version: ctx.config.minor_version,
    };
    ctx.server.send(&credentials).await?;

    let response = bounded(
        &ctx.cancel,
        ctx.config.login_timeout(),
        "login response",
        async { responses.recv().await.ok_or(ClientError::Closed) },
    )
    .await?;
    let (greeting, own_ip, is_supporter) = match response {
        LoginResponse::Success {
            greeting,
            own_ip,
            is_supporter,
            ..
        } => (greeting, own_ip, is_supporter),
        LoginResponse::Failure { reason } => {
            warn!(user = %ctx.username(), %reason, "login rejected");
            return Err(ClientError::LoginRejected(reason));
        }
    };
    info!(user = %ctx.username(), %own_ip, %greeting, "login accepted");

    announce(ctx).await?;

    let start = Instant::now();
    let deadline = start + ctx.config.login_timeout();
    let grace = start + ctx.config.privileges_grace();
    let mut got = Replies::default();
    let mut privileges_assumed = false;

    loop {
        let missing = got.missing();
        if missing.is_empty() {
            break;
        }
        let only_privileges = got.only_privileges_missing();

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ClientError::Cancelled),

            Some(m) = rooms.recv(), if got.rooms.is_none() => {
                got.rooms = Some(m.rooms);
            }
            Some(m) = min_speeds.recv(), if got.parent_min_speed.is_none() => {
                got.parent_min_speed = Some(m.speed);
            }
            Some(m) = ratios.recv(), if got.parent_speed_ratio.is_none() => {
                got.parent_speed_ratio = Some(m.ratio);
            }
            Some(m) = wishlists.recv(), if got.wishlist_interval.is_none() => {
                got.wishlist_interval = Some(m.seconds);
            }
            Some(m) = privileged.recv(), if got.privileged_users.is_none() => {
                got.privileged_users = Some(m.users);
            }
            Some(m) = excluded.recv(), if got.excluded_phrases.is_none() => {
                got.excluded_phrases = Some(m.phrases);
            }
            Some(m) = watches.recv(), if got.own_stats.is_none() => {
                if m.username == ctx.username() {
                    got.own_stats = Some(m.stats);
                }
            }
            Some(m) = privileges.recv(), if got.privileges_left.is_none() => {
                got.privileges_left = Some(m.time_left);
            }

            _ = tokio::time::sleep_until(grace), if only_privileges => {
                info!("no privilege reply, assuming none");
                got.privileges_left = Some(0);
                privileges_assumed = true;
            }
            _ = tokio::time::sleep_until(deadline) => {
                let missing = missing.join(", ");
                warn!(%missing, "login replies missing");
                return Err(ClientError::LoginIncomplete(missing));
            }
        }
    }

    debug!(user = %ctx.username(), "login replies collected");
    Ok(LoginOutcome {
        greeting,
        own_ip,
        is_supporter,
        privileges_left: got.privileges_left.unwrap_or_default(),
        privileges_assumed,
        own_stats: got.own_stats.unwrap_or_default(),
        rooms: got.rooms.unwrap_or_default(),
        parent_min_speed: got.parent_min_speed.unwrap_or_default(),
        parent_speed_ratio: got.parent_speed_ratio.unwrap_or_default(),
        wishlist_interval: got.wishlist_interval.unwrap_or_default(),
        privileged_users: got.privileged_users.unwrap_or_default(),
        excluded_phrases: got.excluded_phrases.unwrap_or_default(),
    })
}

/// Post-login announcements. The order matters to the server.
async fn announce(ctx: &SessionContext) -> Result<(), ClientError> {
    let server = &ctx.server;
    let me = ctx.username().to_owned();
    server.send(&CheckPrivileges).await?;
    server
        .send(&SetWaitPort {
            port: u32::from(ctx.local_port),
        })
        .await?;
    server
        .send(&SetStatus {
            status: UserStatus::Online,
        })
        .await?;
    server
        .send(&SharedFoldersFiles {
            folders: ctx.config.shared_folders,
            files: ctx.config.shared_files,
        })
        .await?;
    server.send(&WatchUser { username: me.clone() }).await?;
    server.send(&HaveNoParent { no_parent: true }).await?;
    server.send(&BranchRoot { root: me }).await?;
    server.send(&BranchLevel { level: 0 }).await?;
    server.send(&AcceptChildren { accept: true }).await?;
    Ok(())
}
