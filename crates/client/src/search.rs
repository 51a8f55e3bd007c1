//! Routing of search results to the search that asked for them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use slsk_protocol::Token;
use slsk_protocol::messages::peer::FileSearchResponse;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

/// Results buffered per search before further ones are dropped.
pub const SEARCH_RESULT_BUFFER: usize = 256;

/// Token-to-channel table for in-flight searches.
#[derive(Default)]
pub struct SearchRouter {
    routes: RwLock<HashMap<Token, mpsc::Sender<FileSearchResponse>>>,
}

impl SearchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a result channel for `token`, replacing any earlier one.
    pub fn register(&self, token: Token) -> mpsc::Receiver<FileSearchResponse> {
        let (tx, rx) = mpsc::channel(SEARCH_RESULT_BUFFER);
        self.routes.write().insert(token, tx);
        rx
    }

    /// Removes the route; no result is written to it afterwards.
    pub fn remove(&self, token: Token) {
        if self.routes.write().remove(&token).is_some() {
            debug!(%token, "search closed");
        }
    }

    /// Delivers `result` to the search with the same token.
    ///
    /// Returns `false` if there is no such search or its buffer is full.
    pub fn route(&self, result: FileSearchResponse) -> bool {
        let token = result.token;
        let routes = self.routes.read();
        let Some(tx) = routes.get(&token) else {
            trace!(%token, peer = %result.username, "result for unknown search");
            return false;
        };
        match tx.try_send(result) {
            Ok(()) => true,
            Err(TrySendError::Full(r)) => {
                debug!(%token, peer = %r.username, "search buffer full, result dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                drop(routes);
                self.remove(token);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

/// An in-flight search. Dropping it closes the search.
pub struct Search {
    token: Token,
    rx: mpsc::Receiver<FileSearchResponse>,
    router: Arc<SearchRouter>,
}

impl Search {
    pub(crate) fn new(router: Arc<SearchRouter>, token: Token) -> Self {
        let rx = router.register(token);
        Self { token, rx, router }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Next result, or `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<FileSearchResponse> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FileSearchResponse> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Search {
    fn drop(&mut self) {
        self.router.remove(self.token);
    }
}

impl std::fmt::Debug for Search {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Search").field("token", &self.token).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(token: u32, user: &str) -> FileSearchResponse {
        FileSearchResponse {
            username: user.into(),
            token: Token(token),
            files: vec![],
            slot_free: true,
            avg_speed: 0,
            queue_length: 0,
            private_files: vec![],
        }
    }

    #[tokio::test]
    async fn results_only_reach_their_own_search() {
        let router = Arc::new(SearchRouter::new());
        let mut a = Search::new(router.clone(), Token(1));
        let mut b = Search::new(router.clone(), Token(2));

        assert!(router.route(result(1, "x")));
        assert!(router.route(result(2, "y")));
        assert!(router.route(result(1, "z")));

        assert_eq!(a.recv().await.unwrap().username, "x");
        assert_eq!(a.recv().await.unwrap().username, "z");
        assert!(a.try_recv().is_none());

        let got = b.recv().await.unwrap();
        assert_eq!(got.token, Token(2));
        assert!(b.try_recv().is_none());
    }

    #[test]
    fn dropping_the_search_removes_the_route() {
        let router = Arc::new(SearchRouter::new());
        let search = Search::new(router.clone(), Token(9));
        assert_eq!(router.len(), 1);
        drop(search);
        assert!(router.is_empty());
        assert!(!router.route(result(9, "late")));
    }

    #[test]
    fn unknown_token_is_dropped() {
        let router = SearchRouter::new();
        assert!(!router.route(result(3, "x")));
    }

    #[test]
    fn full_buffer_drops_without_blocking() {
        let router = Arc::new(SearchRouter::new());
        let _search = Search::new(router.clone(), Token(1));
        for _ in 0..SEARCH_RESULT_BUFFER {
            assert!(router.route(result(1, "x")));
        }
        assert!(!router.route(result(1, "overflow")));
        assert_eq!(router.len(), 1);
    }
}
