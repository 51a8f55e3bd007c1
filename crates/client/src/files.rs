//! Expected incoming file-data sockets.
//!
//! Before accepting a transfer we register `(username, token)` here; the
//! multiplexer hands over the raw socket once the uploader's token arrives.

use std::collections::HashMap;

use parking_lot::Mutex;
use slsk_protocol::Token;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

type Key = (String, Token);

#[derive(Default)]
pub struct FileSockets {
    expected: Mutex<HashMap<Key, oneshot::Sender<TcpStream>>>,
}

impl FileSockets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in the file socket for `token` from `username`.
    ///
    /// Registering the same key again replaces the earlier waiter.
    pub fn expect(&self, username: &str, token: Token) -> oneshot::Receiver<TcpStream> {
        let (tx, rx) = oneshot::channel();
        self.expected.lock().insert((username.to_owned(), token), tx);
        rx
    }

    /// Hands `stream` to whoever expects it. Returns `false` (and drops the
    /// stream) if nobody does.
    pub fn deliver(&self, username: &str, token: Token, stream: TcpStream) -> bool {
        let waiter = self.expected.lock().remove(&(username.to_owned(), token));
        match waiter {
            Some(tx) => tx.send(stream).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, username: &str, token: Token) {
        self.expected.lock().remove(&(username.to_owned(), token));
    }

    pub fn len(&self) -> usize {
        self.expected.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expected.lock().is_empty()
    }
}
