//! Typed notification fan-out.
//!
//! Socket read loops publish decoded messages here instead of calling
//! consumers directly. Each message type has its own topic; a topic may
//! have any number of subscribers, each with its own bounded queue.
//!
//! Publication never blocks the caller. Subscribers with room in their
//! queue receive the value immediately, in publication order. A full
//! subscriber gets until the [`DeliveryPolicy`] deadline to make room;
//! after that the value is dropped for that subscriber only.

mod policy;
mod topic;

pub use policy::{DeliveryPolicy, DeliveryReport};
pub use topic::Subscription;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use topic::Topic;

type AnyTopic = Arc<dyn Any + Send + Sync>;

/// Registry of per-type topics. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

struct Inner {
    topics: RwLock<HashMap<TypeId, AnyTopic>>,
    policy: DeliveryPolicy,
}

impl Notifier {
    pub fn new(policy: DeliveryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                policy,
            }),
        }
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.inner.policy
    }

    /// Registers a new subscriber for values of type `T`.
    pub fn subscribe<T>(&self) -> Subscription<T>
    where
        T: Clone + Send + 'static,
    {
        self.topic::<T>().subscribe(self.inner.policy.capacity)
    }

    /// Number of live subscribers for `T`.
    pub fn subscriber_count<T>(&self) -> usize
    where
        T: Clone + Send + 'static,
    {
        self.existing_topic::<T>()
            .map(|t| t.subscriber_count())
            .unwrap_or(0)
    }

    /// Publishes `value` to every subscriber of `T` without waiting.
    ///
    /// Slow subscribers are served by a background task bounded by the
    /// policy deadline. Outside a Tokio runtime they are skipped.
    pub fn publish<T>(&self, value: T)
    where
        T: Clone + Send + 'static,
    {
        let Some(topic) = self.existing_topic::<T>() else {
            trace!(topic = std::any::type_name::<T>(), "no subscribers");
            return;
        };
        let (report, pending) = topic.offer(&value);
        if pending.is_empty() {
            trace!(
                topic = std::any::type_name::<T>(),
                delivered = report.delivered,
                "published"
            );
            return;
        }
        let deadline = self.inner.policy.deadline;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let late = topic::deliver_pending(pending, value, deadline).await;
                    if late.dropped > 0 {
                        debug!(
                            topic = std::any::type_name::<T>(),
                            dropped = late.dropped,
                            "notification dropped for slow subscribers"
                        );
                    }
                });
            }
            Err(_) => {
                debug!(
                    topic = std::any::type_name::<T>(),
                    dropped = pending.len(),
                    "no runtime for delayed delivery"
                );
            }
        }
    }

    /// Publishes `value` and waits until every subscriber either received
    /// it or ran out of time.
    pub async fn deliver<T>(&self, value: T) -> DeliveryReport
    where
        T: Clone + Send + 'static,
    {
        let Some(topic) = self.existing_topic::<T>() else {
            return DeliveryReport::default();
        };
        let (mut report, pending) = topic.offer(&value);
        if !pending.is_empty() {
            report += topic::deliver_pending(pending, value, self.inner.policy.deadline).await;
        }
        report
    }

    fn existing_topic<T>(&self) -> Option<Arc<Topic<T>>>
    where
        T: Clone + Send + 'static,
    {
        let any = self.inner.topics.read().get(&TypeId::of::<T>())?.clone();
        any.downcast::<Topic<T>>().ok()
    }

    fn topic<T>(&self) -> Arc<Topic<T>>
    where
        T: Clone + Send + 'static,
    {
        if let Some(topic) = self.existing_topic::<T>() {
            return topic;
        }
        let mut topics = self.inner.topics.write();
        let entry = topics
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(Topic::<T>::new()) as AnyTopic)
            .clone();
        drop(topics);
        match entry.downcast::<Topic<T>>() {
            Ok(topic) => topic,
            // Keys are the TypeId of the stored topic's parameter.
            Err(_) => Arc::new(Topic::new()),
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DeliveryPolicy::default())
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("topics", &self.inner.topics.read().len())
            .field("policy", &self.inner.policy)
            .finish()
    }
}
