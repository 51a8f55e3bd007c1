//! Admission control for peer control sockets.
//!
//! A fixed number of permits; acquiring blocks until one is free. The
//! permit travels with the admitted connection and is returned when that
//! connection's read pump stops.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;

/// Held for as long as an admitted peer socket lives.
pub type AdmissionPermit = OwnedSemaphorePermit;

/// Bounds the number of concurrently admitted peers.
#[derive(Debug, Clone)]
pub struct Admission {
    permits: Arc<Semaphore>,
    max: usize,
}

impl Admission {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<AdmissionPermit, ClientError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| ClientError::Closed)
            }
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.max - self.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn blocks_at_capacity_until_release() {
        let admission = Admission::new(1);
        let cancel = CancellationToken::new();
        let first = admission.acquire(&cancel).await.unwrap();
        assert_eq!(admission.in_use(), 1);

        let waiter = {
            let admission = admission.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { admission.acquire(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("released permit should wake the waiter")
            .unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn cancel_unblocks_waiter() {
        let admission = Admission::new(1);
        let cancel = CancellationToken::new();
        let _held = admission.acquire(&cancel).await.unwrap();

        let c = cancel.clone();
        let a = admission.clone();
        let waiter = tokio::spawn(async move { a.acquire(&c).await });
        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ClientError::Cancelled)));
    }

    #[test]
    fn zero_is_clamped_to_one() {
        let admission = Admission::new(0);
        assert_eq!(admission.max(), 1);
        assert_eq!(admission.available(), 1);
    }
}
