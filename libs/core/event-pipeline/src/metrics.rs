//! Prometheus metrics for the event pipeline
//!
//! Provides observability into producers and topic workers.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. If another
/// recorder is already installed, metrics are recorded there and `/metrics`
/// answers 503.
pub fn init_metrics() {
    if PROMETHEUS_HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_ok() {
                info!("Prometheus metrics initialized");
            }
        }
        Err(e) => warn!(error = %e, "Failed to install Prometheus recorder"),
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Metrics helper for one topic worker
#[derive(Clone)]
pub struct PipelineMetrics {
    /// Topic for labeling
    topic: String,
    /// Handler name for labeling
    handler: String,
}

impl PipelineMetrics {
    /// Create new PipelineMetrics
    pub fn new(topic: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            handler: handler.into(),
        }
    }

    /// Record a message being pulled
    pub fn message_received(&self) {
        counter!(
            "event_pipeline_messages_received_total",
            "topic" => self.topic.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    /// Record a message handled successfully
    pub fn message_handled(&self, duration: Duration, attempts: u32) {
        counter!(
            "event_pipeline_messages_processed_total",
            "topic" => self.topic.clone(),
            "handler" => self.handler.clone(),
            "status" => "success"
        )
        .increment(1);

        if attempts > 1 {
            counter!(
                "event_pipeline_handler_retries_total",
                "topic" => self.topic.clone(),
                "handler" => self.handler.clone()
            )
            .increment(u64::from(attempts - 1));
        }

        histogram!(
            "event_pipeline_message_duration_seconds",
            "topic" => self.topic.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a message dropped after its retry sequence failed
    pub fn message_exhausted(&self, attempts: u32, category: &str) {
        counter!(
            "event_pipeline_messages_processed_total",
            "topic" => self.topic.clone(),
            "handler" => self.handler.clone(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "event_pipeline_messages_exhausted_total",
            "topic" => self.topic.clone(),
            "handler" => self.handler.clone(),
            "category" => category.to_string()
        )
        .increment(1);

        if attempts > 1 {
            counter!(
                "event_pipeline_handler_retries_total",
                "topic" => self.topic.clone(),
                "handler" => self.handler.clone()
            )
            .increment(u64::from(attempts - 1));
        }
    }

    /// Record a failed pull
    pub fn transport_error(&self) {
        counter!(
            "event_pipeline_transport_errors_total",
            "topic" => self.topic.clone()
        )
        .increment(1);
    }

    /// Record a failed acknowledgement
    pub fn commit_failed(&self) {
        counter!(
            "event_pipeline_commit_errors_total",
            "topic" => self.topic.clone()
        )
        .increment(1);
    }

    /// Update the worker phase gauge (numeric phase code)
    pub fn worker_phase(&self, phase: u8) {
        gauge!(
            "event_pipeline_worker_phase",
            "topic" => self.topic.clone()
        )
        .set(f64::from(phase));
    }
}

/// Record a producer publish outcome
pub fn record_publish(topic: &str, success: bool, duration: Duration) {
    counter!(
        "event_pipeline_messages_published_total",
        "topic" => topic.to_string(),
        "status" => if success { "success" } else { "failed" }
    )
    .increment(1);

    histogram!(
        "event_pipeline_publish_duration_seconds",
        "topic" => topic.to_string()
    )
    .record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = PipelineMetrics::new("events", "TaskEventHandler");
        assert_eq!(metrics.topic, "events");
        assert_eq!(metrics.handler, "TaskEventHandler");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = PipelineMetrics::new("events", "TaskEventHandler");
        metrics.message_received();
        metrics.message_handled(Duration::from_millis(5), 2);
        metrics.message_exhausted(3, "business");
        record_publish("events", true, Duration::from_millis(1));
    }
}
