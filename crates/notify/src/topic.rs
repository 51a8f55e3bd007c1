use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;

use crate::policy::DeliveryReport;

/// Subscribers of one message type.
pub(crate) struct Topic<T> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, capacity: usize) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.lock().push(tx);
        Subscription { rx }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| !tx.is_closed());
        subs.len()
    }

    /// Hands `value` to every subscriber with queue room.
    ///
    /// Returns the subscribers that were full; closed ones are pruned.
    pub(crate) fn offer(&self, value: &T) -> (DeliveryReport, Vec<mpsc::Sender<T>>) {
        let mut report = DeliveryReport::default();
        let mut pending = Vec::new();
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                pending.push(tx.clone());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        (report, pending)
    }
}

/// Waits up to `deadline` for each full subscriber to accept `value`.
pub(crate) async fn deliver_pending<T>(
    pending: Vec<mpsc::Sender<T>>,
    value: T,
    deadline: Duration,
) -> DeliveryReport
where
    T: Clone + Send + 'static,
{
    let until = tokio::time::Instant::now() + deadline;
    let mut set = JoinSet::new();
    for tx in pending {
        let value = value.clone();
        set.spawn(async move {
            matches!(
                tokio::time::timeout_at(until, tx.send(value)).await,
                Ok(Ok(()))
            )
        });
    }

    let mut report = DeliveryReport::default();
    while let Some(res) = set.join_next().await {
        match res {
            Ok(true) => report.delivered += 1,
            _ => report.dropped += 1,
        }
    }
    report
}

/// Receiving end of one subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Waits for the next value; `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn into_inner(self) -> mpsc::Receiver<T> {
        self.rx
    }
}
