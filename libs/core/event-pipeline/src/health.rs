//! Health check handlers for the consumer process.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`): every topic worker running and
//!   Redis answering PING
//! - Worker inspection (`/workers`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::metrics;
use crate::worker::{WorkerPhase, WorkerState, WorkerStatus};

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Application name.
    pub app_name: String,
    /// Application version.
    pub app_version: String,
    /// Worker status handles from the consumer manager.
    pub workers: Vec<Arc<WorkerStatus>>,
    /// Redis connection for readiness checks, if the transport is Redis.
    pub redis: Option<ConnectionManager>,
}

impl HealthState {
    /// Create a new health state.
    pub fn new(
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        workers: Vec<Arc<WorkerStatus>>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            workers,
            redis: None,
        }
    }

    /// Check Redis with PING on readiness requests.
    pub fn with_redis(mut self, redis: ConnectionManager) -> Self {
        self.redis = Some(redis);
        self
    }

    fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|w| w.snapshot()).collect()
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: &'static str,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready when at least one worker exists, every worker is `Running`, and
/// Redis (when configured) answers PING.
pub async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let states = state.worker_states();
    let workers_ok =
        !states.is_empty() && states.iter().all(|s| s.phase == WorkerPhase::Running);

    let workers_check = if workers_ok {
        "ok".to_string()
    } else {
        let not_running: Vec<String> = states
            .iter()
            .filter(|s| s.phase != WorkerPhase::Running)
            .map(|s| format!("{}={}", s.topic, s.phase))
            .collect();
        if states.is_empty() {
            "no workers started".to_string()
        } else {
            format!("not running: {}", not_running.join(", "))
        }
    };

    let (redis_ok, redis_check) = match state.redis.clone() {
        None => (true, "skipped".to_string()),
        Some(mut conn) => {
            let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
            match result {
                Ok(response) if response == "PONG" => (true, "ok".to_string()),
                Ok(response) => (false, format!("unexpected response: {}", response)),
                Err(e) => (false, format!("error: {}", e)),
            }
        }
    };

    let ready = workers_ok && redis_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "workers": workers_check,
                "redis": redis_check,
            }
        })),
    )
}

/// Worker state listing.
pub async fn workers_handler(State(state): State<HealthState>) -> Json<Vec<WorkerState>> {
    Json(state.worker_states())
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create the health router.
///
/// - `/health`, `/healthz` - Liveness probe
/// - `/ready`, `/readyz` - Readiness probe
/// - `/workers` - Topic worker states
/// - `/metrics` - Prometheus metrics
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/workers", get(workers_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
