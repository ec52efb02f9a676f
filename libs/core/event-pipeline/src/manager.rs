//! Consumer manager.
//!
//! Owns one [`TopicWorker`] per registered topic and the shared shutdown
//! signal. `start` establishes every reader before spawning anything, so a
//! broker that is unreachable fails the call instead of producing half a pool.
//! `stop` signals every worker, waits for each to drain and reports the
//! readers' close results.

use crate::config::ConsumerConfig;
use crate::error::PipelineError;
use crate::registry::HandlerRegistry;
use crate::transport::Transport;
use crate::worker::{TopicWorker, WorkerPhase, WorkerState, WorkerStatus};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Runs the topic workers of one consumer group
pub struct ConsumerManager {
    transport: Arc<dyn Transport>,
    registry: HandlerRegistry,
    config: ConsumerConfig,
    shutdown: Option<watch::Sender<bool>>,
    workers: JoinSet<(String, Result<(), PipelineError>)>,
    statuses: Vec<Arc<WorkerStatus>>,
}

impl ConsumerManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: HandlerRegistry,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
            shutdown: None,
            workers: JoinSet::new(),
            statuses: Vec::new(),
        }
    }

    /// Consumer configuration
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Check if workers are running
    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Create a reader per topic and spawn the workers.
    ///
    /// Returns once every worker is `Running`. If any reader cannot be
    /// created, the readers created so far are closed and the error returned.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::Config(
                "consumer manager is already started".into(),
            ));
        }
        if self.registry.is_empty() {
            return Err(PipelineError::Config("no topic handlers registered".into()));
        }

        info!(
            transport = self.transport.name(),
            group = %self.config.group_id,
            consumer = %self.config.consumer_id,
            topics = ?self.registry.topics(),
            "Starting consumer manager"
        );

        let mut workers = Vec::with_capacity(self.registry.len());
        for (topic, handler) in self.registry.iter() {
            let status = Arc::new(WorkerStatus::new(topic));

            match self.transport.reader(topic, &self.config).await {
                Ok(reader) => {
                    workers.push(TopicWorker::new(reader, Arc::clone(handler), &self.config, status));
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "Failed to create topic reader");
                    for worker in workers {
                        if let Err(close_err) = worker.abandon().await {
                            warn!(error = %close_err, "Failed to close reader after start failure");
                        }
                    }
                    return Err(e);
                }
            }
        }

        let (tx, rx) = watch::channel(false);
        self.statuses = workers.iter().map(TopicWorker::status).collect();
        for worker in workers {
            let topic = worker.status().topic().to_string();
            let shutdown = rx.clone();
            self.workers
                .spawn(async move { (topic, worker.run(shutdown).await) });
        }
        self.shutdown = Some(tx);

        info!(workers = self.statuses.len(), "Consumer manager started");
        Ok(())
    }

    /// Signal shutdown and wait for every worker to stop.
    ///
    /// In-progress retry sequences finish first. The first reader close error
    /// is returned and later ones are logged. No-op when not started.
    pub async fn stop(&mut self) -> Result<(), PipelineError> {
        let Some(shutdown) = self.shutdown.take() else {
            debug!("Consumer manager not running, nothing to stop");
            return Ok(());
        };

        info!("Stopping consumer manager");
        shutdown.send_replace(true);

        let mut first_error: Option<PipelineError> = None;
        while let Some(joined) = self.workers.join_next().await {
            let (topic, result) = match joined {
                Ok(done) => done,
                Err(e) => (
                    "<unknown>".to_string(),
                    Err(PipelineError::transport(format!("topic worker task failed: {}", e))),
                ),
            };

            if let Err(e) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    warn!(topic = %topic, error = %e, "Additional error while stopping topic worker");
                }
            }
        }

        match first_error {
            Some(e) => {
                error!(error = %e, "Consumer manager stopped with errors");
                Err(e)
            }
            None => {
                info!("Consumer manager stopped");
                Ok(())
            }
        }
    }

    /// Status handles of the running workers (empty before `start`)
    pub fn statuses(&self) -> Vec<Arc<WorkerStatus>> {
        self.statuses.clone()
    }

    /// Snapshots of every worker's state
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.statuses.iter().map(|s| s.snapshot()).collect()
    }

    /// Check if every worker is running
    pub fn all_running(&self) -> bool {
        !self.statuses.is_empty()
            && self
                .statuses
                .iter()
                .all(|s| s.phase() == WorkerPhase::Running)
    }
}

impl std::fmt::Debug for ConsumerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerManager")
            .field("transport", &self.transport.name())
            .field("registry", &self.registry)
            .field("group_id", &self.config.group_id)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::retry::RetryPolicy;
    use crate::testing::{RecordingHandler, wait_until};
    use crate::transport::{InMemoryBroker, Publisher};
    use std::time::Duration;

    const GROUP: &str = "notifications";

    fn config() -> ConsumerConfig {
        ConsumerConfig::new(GROUP)
            .with_consumer_id("manager-test")
            .with_poll_interval(Duration::from_millis(10))
    }

    fn registry(topics: &[(&str, Arc<RecordingHandler>)]) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for (topic, handler) in topics {
            registry.register(*topic, Arc::clone(handler) as _).unwrap();
        }
        registry
    }

    async fn publish(broker: &InMemoryBroker, topic: &str, value: &str) {
        broker
            .publish(&Envelope::new(topic, "a@x.com", value))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_dispatches_per_topic() {
        let broker = InMemoryBroker::new();
        let verification = Arc::new(RecordingHandler::new());
        let events = Arc::new(RecordingHandler::new());
        let mut manager = ConsumerManager::new(
            Arc::new(broker.clone()),
            registry(&[
                ("email-verification", Arc::clone(&verification)),
                ("events", Arc::clone(&events)),
            ]),
            config(),
        );

        manager.start().await.unwrap();
        assert!(manager.is_running());
        assert!(manager.all_running());
        assert_eq!(manager.worker_states().len(), 2);

        publish(&broker, "email-verification", "v1").await;
        publish(&broker, "events", "e1").await;
        publish(&broker, "events", "e2").await;

        wait_until(|| verification.seen().len() == 1 && events.seen().len() == 2).await;
        manager.stop().await.unwrap();

        assert_eq!(verification.seen(), vec![b"v1".to_vec()]);
        assert_eq!(events.seen(), vec![b"e1".to_vec(), b"e2".to_vec()]);
        assert!(!manager.is_running());
        assert!(
            manager
                .worker_states()
                .iter()
                .all(|s| s.phase == WorkerPhase::Stopped && s.cancelled)
        );
        assert_eq!(broker.open_readers(), 0);
    }

    #[tokio::test]
    async fn test_start_fails_fast_and_closes_created_readers() {
        let broker = InMemoryBroker::new();
        broker.fail_reader("events");
        let handler = Arc::new(RecordingHandler::new());
        let mut manager = ConsumerManager::new(
            Arc::new(broker.clone()),
            registry(&[
                ("email-verification", Arc::clone(&handler)),
                ("events", Arc::clone(&handler)),
            ]),
            config(),
        );

        assert!(manager.start().await.is_err());
        assert!(!manager.is_running());
        assert_eq!(broker.open_readers(), 0);

        // Nothing to stop
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_requires_handlers_and_single_start() {
        let broker = InMemoryBroker::new();
        let mut empty = ConsumerManager::new(Arc::new(broker.clone()), HandlerRegistry::new(), config());
        assert!(matches!(empty.start().await, Err(PipelineError::Config(_))));

        let mut manager = ConsumerManager::new(
            Arc::new(broker.clone()),
            registry(&[("events", Arc::new(RecordingHandler::new()))]),
            config(),
        );
        manager.start().await.unwrap();
        assert!(matches!(manager.start().await, Err(PipelineError::Config(_))));
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_returns_first_close_error() {
        let broker = InMemoryBroker::new();
        broker.fail_close("email-verification");
        broker.fail_close("events");
        let handler = Arc::new(RecordingHandler::new());
        let mut manager = ConsumerManager::new(
            Arc::new(broker.clone()),
            registry(&[
                ("email-verification", Arc::clone(&handler)),
                ("events", Arc::clone(&handler)),
            ]),
            config(),
        );

        manager.start().await.unwrap();
        let err = manager.stop().await.unwrap_err();

        assert!(err.to_string().contains("injected close failure"));
        assert_eq!(broker.open_readers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_retry_sequence_and_stops_pulling() {
        let broker = InMemoryBroker::new();
        let handler = Arc::new(RecordingHandler::failing(u32::MAX));
        let mut manager = ConsumerManager::new(
            Arc::new(broker.clone()),
            registry(&[("events", Arc::clone(&handler))]),
            config().with_retry(RetryPolicy::default()),
        );

        manager.start().await.unwrap();
        publish(&broker, "events", "doomed").await;
        wait_until(|| handler.calls() == 1).await;

        let started = tokio::time::Instant::now();
        let stopping = tokio::spawn(async move {
            let result = manager.stop().await;
            (manager, result)
        });

        // Published after stop() began: must never be pulled
        tokio::time::sleep(Duration::from_millis(10)).await;
        publish(&broker, "events", "marker").await;

        let (manager, result) = stopping.await.unwrap();
        result.unwrap();

        // The retry sequence ran to exhaustion before stop returned
        assert_eq!(handler.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(broker.undelivered("events", GROUP), 1);
        assert_eq!(manager.worker_states()[0].failed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_after_restart() {
        let broker = InMemoryBroker::new();
        publish(&broker, "events", "once").await;

        // A reader that pulled but never acknowledged (crash before commit)
        let crashed = broker.reader("events", &config()).await.unwrap();
        let mut crashed = crashed;
        assert!(crashed.fetch().await.unwrap().is_some());
        drop(crashed);

        let handler = Arc::new(RecordingHandler::new());
        let mut manager = ConsumerManager::new(
            Arc::new(broker.clone()),
            registry(&[("events", Arc::clone(&handler))]),
            config(),
        );
        manager.start().await.unwrap();

        wait_until(|| handler.seen().len() == 1).await;
        manager.stop().await.unwrap();

        assert_eq!(handler.seen(), vec![b"once".to_vec()]);
        assert_eq!(broker.pending("events", GROUP), 0);
        assert_eq!(broker.committed("events", GROUP), 1);
    }

    #[tokio::test]
    async fn test_entries_of_vanished_consumer_are_reclaimed() {
        let broker = InMemoryBroker::new();
        publish(&broker, "events", "stranded").await;

        // Pulled by a pod whose name never comes back
        let config = config().with_claim_idle(Duration::from_millis(50));
        let mut gone = broker
            .reader("events", &config.clone().with_consumer_id("pod-a"))
            .await
            .unwrap();
        assert!(gone.fetch().await.unwrap().is_some());
        drop(gone);

        let handler = Arc::new(RecordingHandler::new());
        let mut manager = ConsumerManager::new(
            Arc::new(broker.clone()),
            registry(&[("events", Arc::clone(&handler))]),
            config.with_consumer_id("pod-b"),
        );
        manager.start().await.unwrap();

        wait_until(|| handler.seen().len() == 1).await;
        manager.stop().await.unwrap();

        assert_eq!(handler.seen(), vec![b"stranded".to_vec()]);
        assert_eq!(broker.pending("events", GROUP), 0);
        assert_eq!(broker.committed("events", GROUP), 1);
    }
}
