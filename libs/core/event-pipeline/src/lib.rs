//! Event Pipeline
//!
//! Topic-based event delivery between domain services and the notification
//! consumers.
//!
//! ## Features
//!
//! - **Envelope codec**: `topic/key/value` envelopes with JSON payloads and
//!   stable key-to-partition mapping
//! - **Producer**: one acknowledged publish per call with a delivery deadline
//! - **Consumer manager**: one sequential worker per topic, bounded linear
//!   retry, graceful drain on shutdown
//! - **Transports**: Redis Streams consumer groups, and an in-memory broker for
//!   tests and local runs
//! - **Prometheus metrics** and **health endpoints**
//!
//! ## Example
//!
//! ```ignore
//! use event_pipeline::{ConsumerConfig, ConsumerManager, HandlerRegistry, RedisTransport};
//!
//! let transport = Arc::new(RedisTransport::open(&redis_url)?);
//!
//! let registry = HandlerRegistry::new()
//!     .with_handler("email-verification", Arc::new(VerificationHandler::new(notifier.clone())))?
//!     .with_handler("events", Arc::new(TaskEventHandler::new(notifier)))?;
//!
//! let mut manager = ConsumerManager::new(transport, registry, ConsumerConfig::new("notifications"));
//! manager.start().await?;
//! shutdown_signal().await;
//! manager.stop().await?;
//! ```

mod config;
mod envelope;
mod error;
mod health;
mod manager;
pub mod metrics;
mod producer;
mod registry;
mod retry;
pub mod transport;
mod worker;

#[cfg(test)]
mod testing;

// Re-export main types
pub use config::ConsumerConfig;
pub use envelope::{Envelope, ReceivedEnvelope, partition_for};
pub use error::{ErrorCategory, PipelineError};
pub use health::{HealthState, health_router};
pub use manager::ConsumerManager;
pub use metrics::{PipelineMetrics, init_metrics};
pub use producer::{DEFAULT_DELIVERY_DEADLINE, Producer};
pub use registry::{HandlerRegistry, MessageHandler};
pub use retry::{HandleOutcome, RetryPolicy};
pub use transport::{
    DeliveryReceipt, InMemoryBroker, Publisher, RedisPublisher, RedisTransport, TopicReader,
    Transport,
};
pub use worker::{TopicWorker, WorkerPhase, WorkerState, WorkerStatus};
