//! Correlation tokens.
//!
//! Tokens are chosen by the client, never by the server. They tie a search
//! to its results, a transfer request to its response and file socket, and
//! an indirect connection request to the piercing socket that answers it.

use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque 32-bit correlation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for Token {
    fn from(v: u32) -> Self {
        Token(v)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out process-unique tokens.
///
/// Starts from a random offset so tokens from two runs against the same
/// peers are unlikely to overlap.
#[derive(Debug)]
pub struct TokenGenerator {
    next: AtomicU32,
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self::starting_at(rand::random::<u32>() >> 1)
    }

    pub fn starting_at(start: u32) -> Self {
        Self {
            next: AtomicU32::new(start),
        }
    }

    pub fn next(&self) -> Token {
        Token(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}
