use std::ops::AddAssign;
use std::time::Duration;

/// How long a notification stays worth delivering, and how much a
/// subscriber may buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Time a full subscriber has to make room before the value is
    /// dropped for it.
    pub deadline: Duration,
    /// Queue length of each new subscription.
    pub capacity: usize,
}

impl DeliveryPolicy {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            ..Self::default()
        }
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(3),
            capacity: 64,
        }
    }
}

/// Outcome of one publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Subscribers that stayed full past the deadline.
    pub dropped: usize,
}

impl AddAssign for DeliveryReport {
    fn add_assign(&mut self, rhs: Self) {
        self.delivered += rhs.delivered;
        self.dropped += rhs.dropped;
    }
}
