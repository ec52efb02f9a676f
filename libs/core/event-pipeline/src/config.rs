//! Consumer configuration
//!
//! This module provides `ConsumerConfig` for configuring the consumer manager
//! and its topic workers.

use crate::retry::RetryPolicy;
use std::time::Duration;
use uuid::Uuid;

/// Configuration shared by every topic worker of a consumer manager
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group all instances of the service join
    pub group_id: String,

    /// Unique consumer name within the group (auto-generated if not provided)
    pub consumer_id: String,

    /// How long a pull that found nothing waits before returning
    pub poll_interval: Duration,

    /// Entries left unacknowledged by another consumer for this long are
    /// claimed by this one; also how often the check runs
    pub claim_idle: Duration,

    /// Maximum entries fetched from the transport per pull
    pub batch_size: usize,

    /// Per-message retry policy
    pub retry: RetryPolicy,

    /// Upper bound for the backoff after consecutive transport errors
    pub max_transport_backoff: Duration,
}

impl ConsumerConfig {
    /// Create a new ConsumerConfig for a consumer group
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            consumer_id: format!("consumer-{}", Uuid::new_v4()),
            poll_interval: Duration::from_millis(500),
            claim_idle: Duration::from_secs(30),
            batch_size: 10,
            retry: RetryPolicy::default(),
            max_transport_backoff: Duration::from_secs(30),
        }
    }

    /// Set the consumer ID
    pub fn with_consumer_id(mut self, id: impl Into<String>) -> Self {
        self.consumer_id = id.into();
        self
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the idle time after which another consumer's entries are claimed
    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle = idle;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the transport error backoff cap
    pub fn with_max_transport_backoff(mut self, backoff: Duration) -> Self {
        self.max_transport_backoff = backoff;
        self
    }

    /// Backoff after `consecutive_errors` failed pulls: 1s, 2s, 4s, ... capped
    pub fn transport_backoff(&self, consecutive_errors: u32) -> Duration {
        let exp = consecutive_errors.saturating_sub(1).min(16);
        Duration::from_secs(1u64 << exp).min(self.max_transport_backoff)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::new("notifications")
    }
}
