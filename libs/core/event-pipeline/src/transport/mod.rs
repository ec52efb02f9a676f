//! Transport abstraction layer
//!
//! Provides a trait-based seam between the pipeline and the message broker:
//! - Redis Streams (`redis_streams` module), used in deployments
//! - In-memory (`memory` module), used by tests and local runs
//!
//! Each reader returned by a [`Transport`] owns its own connection and is
//! driven by exactly one topic worker.

pub mod memory;
pub mod redis_streams;

pub use self::memory::InMemoryBroker;
pub use self::redis_streams::{RedisPublisher, RedisTransport};

use crate::config::ConsumerConfig;
use crate::envelope::{Envelope, ReceivedEnvelope};
use crate::error::PipelineError;
use async_trait::async_trait;

/// Broker acknowledgement for a published envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Topic written to
    pub topic: String,
    /// Partition the key mapped to
    pub partition: u32,
    /// Position assigned by the broker
    pub offset: String,
}

/// Write side of a transport
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Write one envelope and wait for the broker's acknowledgement
    async fn publish(&self, envelope: &Envelope) -> Result<DeliveryReceipt, PipelineError>;

    /// Release the publisher's resources
    async fn close(&self) -> Result<(), PipelineError>;
}

/// Read side of one topic, bound to a consumer group
#[async_trait]
pub trait TopicReader: Send {
    /// Pull the next entry.
    ///
    /// Returns `Ok(None)` when nothing arrived within the poll interval.
    /// Implementations must be cancel-safe: dropping the future must not lose
    /// an entry that was not yet returned (it stays pending in the group).
    async fn fetch(&mut self) -> Result<Option<ReceivedEnvelope>, PipelineError>;

    /// Mark an entry as consumed by the group
    async fn commit(&mut self, message: &ReceivedEnvelope) -> Result<(), PipelineError>;

    /// Close the reader and its connection
    async fn close(&mut self) -> Result<(), PipelineError>;
}

/// Factory for topic readers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a reader for `topic` that joins `config.group_id`
    async fn reader(
        &self,
        topic: &str,
        config: &ConsumerConfig,
    ) -> Result<Box<dyn TopicReader>, PipelineError>;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}
