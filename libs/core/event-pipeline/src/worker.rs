//! Topic worker.
//!
//! One worker drives one topic's reader. Processing is strictly sequential:
//! pull, dispatch with bounded retry, acknowledge, then pull again. A later
//! message is never dispatched before an earlier one's retry sequence has
//! resolved.
//!
//! ```text
//! Starting ──reader ready──> Running ──shutdown──> Draining ──reader closed──> Stopped
//! ```

use crate::config::ConsumerConfig;
use crate::envelope::ReceivedEnvelope;
use crate::error::PipelineError;
use crate::metrics::PipelineMetrics;
use crate::registry::MessageHandler;
use crate::retry::{HandleOutcome, RetryPolicy};
use crate::transport::TopicReader;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;
use strum::{AsRefStr, Display};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a topic worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum WorkerPhase {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

impl WorkerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerPhase::Starting,
            1 => WorkerPhase::Running,
            2 => WorkerPhase::Draining,
            _ => WorkerPhase::Stopped,
        }
    }
}

/// Live status of one worker, shared with the manager and health endpoints
#[derive(Debug)]
pub struct WorkerStatus {
    topic: String,
    phase: AtomicU8,
    cancelled: AtomicBool,
    in_flight: AtomicBool,
    handled: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStatus {
    /// Create a status in the `Starting` phase
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            phase: AtomicU8::new(WorkerPhase::Starting as u8),
            cancelled: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            handled: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> WorkerState {
        WorkerState {
            topic: self.topic.clone(),
            phase: self.phase(),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            handled: self.handled.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Snapshot of a worker's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerState {
    pub topic: String,
    pub phase: WorkerPhase,
    /// Shutdown was observed
    pub cancelled: bool,
    /// A message (and its retry sequence) is being processed
    pub in_flight: bool,
    /// Messages handled successfully
    pub handled: u64,
    /// Messages dropped after exhausting retries or failing to decode
    pub failed: u64,
}

/// Worker that owns one topic's reader and its handler
pub struct TopicWorker {
    topic: String,
    reader: Box<dyn TopicReader>,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
    status: Arc<WorkerStatus>,
    metrics: PipelineMetrics,
}

impl TopicWorker {
    /// Create a worker for an established reader; the status moves to `Running`
    pub fn new(
        reader: Box<dyn TopicReader>,
        handler: Arc<dyn MessageHandler>,
        config: &ConsumerConfig,
        status: Arc<WorkerStatus>,
    ) -> Self {
        let topic = status.topic().to_string();
        let metrics = PipelineMetrics::new(&topic, handler.name());
        status.set_phase(WorkerPhase::Running);
        metrics.worker_phase(WorkerPhase::Running as u8);

        Self {
            topic,
            reader,
            handler,
            config: config.clone(),
            status,
            metrics,
        }
    }

    /// Shared status handle
    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    fn retry(&self) -> RetryPolicy {
        self.config.retry
    }

    /// Run until the shutdown signal flips to `true` (or its sender is dropped).
    ///
    /// Returns the reader's close result.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        info!(
            topic = %self.topic,
            handler = self.handler.name(),
            group = %self.config.group_id,
            consumer = %self.config.consumer_id,
            "Starting topic worker"
        );

        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            // A pull in progress is abandoned on shutdown; the entry stays pending
            let pulled = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                result = self.reader.fetch() => result,
            };

            match pulled {
                Ok(Some(message)) => {
                    if consecutive_errors > 0 {
                        info!(
                            topic = %self.topic,
                            consecutive_errors,
                            "Transport recovered"
                        );
                        consecutive_errors = 0;
                    }
                    self.process(&message).await;
                }
                Ok(None) => {}
                Err(PipelineError::Shutdown) => break,
                Err(e) => {
                    consecutive_errors += 1;
                    self.metrics.transport_error();
                    let backoff = self.config.transport_backoff(consecutive_errors);
                    warn!(
                        topic = %self.topic,
                        error = %e,
                        consecutive_errors,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to pull from topic, backing off"
                    );

                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        self.drain().await
    }

    /// Dispatch one message through the retry policy, then acknowledge it
    async fn process(&mut self, message: &ReceivedEnvelope) {
        self.status.in_flight.store(true, Ordering::SeqCst);
        self.metrics.message_received();

        if message.is_redelivery() {
            debug!(
                topic = %self.topic,
                offset = %message.offset,
                delivery_count = message.delivery_count,
                "Processing redelivered message"
            );
        }

        let start = Instant::now();
        let outcome = self.retry().execute(self.handler.as_ref(), message).await;

        match &outcome {
            HandleOutcome::Handled { attempts } => {
                self.status.handled.fetch_add(1, Ordering::SeqCst);
                self.metrics.message_handled(start.elapsed(), *attempts);
            }
            HandleOutcome::Exhausted { attempts, error } => {
                self.status.failed.fetch_add(1, Ordering::SeqCst);
                self.metrics
                    .message_exhausted(*attempts, error.category().as_str());
                error!(
                    topic = %self.topic,
                    partition = message.partition,
                    offset = %message.offset,
                    key = %message.envelope.key_str(),
                    handler = self.handler.name(),
                    attempts,
                    error = %error,
                    "Dropping message after exhausting retries"
                );
            }
            HandleOutcome::Rejected { error } => {
                self.status.failed.fetch_add(1, Ordering::SeqCst);
                self.metrics.message_exhausted(1, error.category().as_str());
                error!(
                    topic = %self.topic,
                    partition = message.partition,
                    offset = %message.offset,
                    key = %message.envelope.key_str(),
                    handler = self.handler.name(),
                    error = %error,
                    "Dropping message that cannot be processed"
                );
            }
        }

        if let Err(e) = self.reader.commit(message).await {
            self.metrics.commit_failed();
            warn!(
                topic = %self.topic,
                offset = %message.offset,
                error = %e,
                "Failed to acknowledge message, it will be redelivered"
            );
        }

        self.status.in_flight.store(false, Ordering::SeqCst);
    }

    async fn drain(mut self) -> Result<(), PipelineError> {
        self.status.cancelled.store(true, Ordering::SeqCst);
        self.status.set_phase(WorkerPhase::Draining);
        self.metrics.worker_phase(WorkerPhase::Draining as u8);
        info!(topic = %self.topic, "Shutdown requested, draining topic worker");

        let result = self.reader.close().await;

        self.status.set_phase(WorkerPhase::Stopped);
        self.metrics.worker_phase(WorkerPhase::Stopped as u8);
        match &result {
            Ok(()) => info!(topic = %self.topic, "Topic worker stopped"),
            Err(e) => warn!(topic = %self.topic, error = %e, "Topic worker stopped, reader close failed"),
        }
        result
    }

    /// Close the reader of a worker that never ran
    pub(crate) async fn abandon(mut self) -> Result<(), PipelineError> {
        let result = self.reader.close().await;
        self.status.set_phase(WorkerPhase::Stopped);
        result
    }
}
