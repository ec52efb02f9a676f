//! Envelope producer
//!
//! Used by domain services to publish events for the notification workers.
//! Every call makes exactly one publish attempt and waits for the transport's
//! acknowledgement or the deadline, whichever comes first.
//!
//! # Example
//!
//! ```rust,ignore
//! use event_pipeline::{Producer, RedisTransport};
//!
//! let transport = RedisTransport::open(&redis_url)?;
//! let producer = Producer::new(Arc::new(transport.publisher().await?));
//!
//! let payload = VerificationPayload::new("a@x.com", "4821", "alice");
//! producer.send_json("email-verification", "a@x.com", &payload).await?;
//! ```

use crate::envelope::Envelope;
use crate::error::PipelineError;
use crate::metrics::record_publish;
use crate::transport::{DeliveryReceipt, Publisher};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default time to wait for the broker's acknowledgement
pub const DEFAULT_DELIVERY_DEADLINE: Duration = Duration::from_secs(5);

/// Publishes envelopes with a per-call delivery deadline.
///
/// Share it behind an `Arc`; it holds one transport connection.
pub struct Producer {
    publisher: Arc<dyn Publisher>,
    deadline: Duration,
    closed: AtomicBool,
}

impl Producer {
    /// Create a producer with the default 5 second deadline
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            deadline: DEFAULT_DELIVERY_DEADLINE,
            closed: AtomicBool::new(false),
        }
    }

    /// Set the default delivery deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Default delivery deadline
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Publish raw bytes and wait for the acknowledgement
    pub async fn send(
        &self,
        topic: impl Into<String>,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<DeliveryReceipt, PipelineError> {
        let envelope = Envelope::new(topic, key, value);
        self.send_with_deadline(&envelope, self.deadline).await
    }

    /// JSON-encode a payload and publish it
    pub async fn send_json<T: Serialize>(
        &self,
        topic: impl Into<String>,
        key: impl Into<Vec<u8>>,
        payload: &T,
    ) -> Result<DeliveryReceipt, PipelineError> {
        let envelope = Envelope::encode(topic, key, payload)?;
        self.send_with_deadline(&envelope, self.deadline).await
    }

    /// Publish an envelope, waiting at most `deadline` for the acknowledgement
    pub async fn send_with_deadline(
        &self,
        envelope: &Envelope,
        deadline: Duration,
    ) -> Result<DeliveryReceipt, PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::ProducerClosed);
        }

        let start = Instant::now();
        let result = match tokio::time::timeout(deadline, self.publisher.publish(envelope)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(PipelineError::DeliveryFailed {
                topic: envelope.topic.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Err(PipelineError::DeliveryTimeout {
                topic: envelope.topic.clone(),
                timeout: deadline,
            }),
        };
        record_publish(&envelope.topic, result.is_ok(), start.elapsed());

        if let Ok(receipt) = &result {
            debug!(
                topic = %receipt.topic,
                partition = receipt.partition,
                offset = %receipt.offset,
                "Published envelope"
            );
        }

        result
    }

    /// Close the producer; later sends fail with `ProducerClosed`
    pub async fn close(&self) -> Result<(), PipelineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing producer");
        self.publisher.close().await
    }

    /// Check if `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("deadline", &self.deadline)
            .field("closed", &self.is_closed())
            .finish()
    }
}
