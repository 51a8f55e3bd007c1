//! State shared by every task of one session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use slsk_notify::Notifier;
use slsk_protocol::{Token, TokenGenerator};
use tokio_util::sync::CancellationToken;

use crate::admission::Admission;
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::distributed::DistributedNode;
use crate::error::ClientError;
use crate::files::FileSockets;
use crate::peer::PeerRegistry;
use crate::search::SearchRouter;
use crate::traversal::PendingTokens;

/// Everything a session owns. Each table carries its own lock; nothing
/// here is locked as a whole.
pub(crate) struct SessionContext {
    pub config: ClientConfig,
    pub server: Connection,
    pub local_port: u16,
    pub notifier: Notifier,
    pub peers: PeerRegistry,
    pub pending: PendingTokens,
    pub files: FileSockets,
    pub searches: Arc<SearchRouter>,
    pub node: DistributedNode,
    pub admission: Admission,
    pub tokens: TokenGenerator,
    pub peer_dispatch: Dispatcher,
    pub cancel: CancellationToken,
}

impl SessionContext {
    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn next_token(&self) -> Token {
        self.tokens.next()
    }
}

/// Runs `fut` until it finishes, `timeout` elapses, or the session ends.
pub(crate) async fn bounded<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    what: &'static str,
    fut: F,
) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        result = tokio::time::timeout(timeout, fut) => {
            result.unwrap_or_else(|_| Err(ClientError::Timeout(what)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = bounded(
            &cancel,
            Duration::from_secs(1),
            "nothing",
            std::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(ClientError::Timeout("nothing"))));
    }

    #[tokio::test]
    async fn bounded_observes_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            bounded(&cancel, Duration::from_secs(1), "x", std::future::pending()).await;
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn bounded_passes_result_through() {
        let cancel = CancellationToken::new();
        let result = bounded(&cancel, Duration::from_secs(1), "x", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
