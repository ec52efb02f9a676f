//! Notifications Worker Service
//!
//! Hosts the consumer manager for the notification topics.
//!
//! ## Architecture
//!
//! ```text
//! Redis Streams (email-verification, events)
//!   ↓ (Consumer Group: notifications)
//! ConsumerManager → one TopicWorker per topic
//!   ↓ (decode + dispatch)
//! VerificationHandler / TaskEventHandler
//!   ↓ (renders templates)
//! EmailNotifier (Handlebars)
//!   ↓ (sends emails)
//! SmtpProvider (lettre)
//! ```
//!
//! ## Features
//!
//! - Consumer group support for horizontal scaling
//! - Bounded linear retry per message, in-order per topic
//! - Graceful shutdown: in-flight retry sequences finish before exit
//! - Health check and metrics endpoints for Kubernetes probes

pub mod config;

use axum::Router;
use config::WorkerSettings;
use core_config::{Environment, FromEnv};
use domain_notifications::{EmailNotifier, SmtpProvider, build_registry};
use event_pipeline::{ConsumerManager, HealthState, RedisTransport, health_router, metrics};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Start the health HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Worker states: `/workers`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, address: String) -> Result<()> {
    let app: Router = health_router(health_state);

    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", address))?;

    info!(address = %address, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the notifications worker
///
/// This is the main entry point for the worker. It:
/// 1. Sets up error reports and structured logging
/// 2. Loads settings and connects the Redis transport
/// 3. Starts one topic worker per notification topic
/// 4. Serves health/metrics until SIGINT or SIGTERM, then drains and stops
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is missing or invalid
/// - Redis is unreachable at startup
/// - A topic worker cannot be started
/// - A reader fails to close during shutdown
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics();

    let app_name = env!("CARGO_PKG_NAME");
    let app_version = env!("CARGO_PKG_VERSION");
    info!(name = %app_name, version = %app_version, "Starting notifications worker");
    info!("Environment: {:?}", environment);

    let settings = WorkerSettings::from_env().wrap_err("Failed to load worker configuration")?;
    let consumer_config = settings.consumer_config();
    info!(
        group = %consumer_config.group_id,
        consumer = %consumer_config.consumer_id,
        verification_topic = %settings.topics.verification,
        events_topic = %settings.topics.events,
        partitions = settings.redis.partitions,
        poll_interval_ms = consumer_config.poll_interval.as_millis() as u64,
        claim_idle_ms = consumer_config.claim_idle.as_millis() as u64,
        max_attempts = consumer_config.retry.max_attempts,
        "Worker configuration loaded"
    );

    let transport = RedisTransport::open(&settings.redis.url)
        .wrap_err("Invalid Redis URL")?
        .with_partitions(settings.redis.partitions)
        .with_max_length(settings.redis.max_stream_length);

    info!("Connecting to Redis...");
    let redis = transport
        .connect()
        .await
        .wrap_err("Failed to connect to Redis")?;
    info!("Connected to Redis successfully");

    let provider = SmtpProvider::new(settings.smtp.clone()).wrap_err("Failed to create SMTP provider")?;
    let notifier =
        EmailNotifier::new(Arc::new(provider)).wrap_err("Failed to initialize email templates")?;
    info!(provider = notifier.provider_name(), "Email notifier initialized");

    let registry = build_registry(&settings.topics, Arc::new(notifier))
        .wrap_err("Failed to register topic handlers")?;

    let mut manager = ConsumerManager::new(Arc::new(transport), registry, consumer_config);
    manager
        .start()
        .await
        .wrap_err("Failed to start topic workers")?;

    let health_state = HealthState::new(app_name, app_version, manager.statuses()).with_redis(redis);
    let health_address = settings.health.address();
    let health_server = tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_address).await {
            error!(error = %e, "Health server failed");
        }
    });

    if let Err(e) = shutdown_signal().await {
        error!("Error waiting for shutdown signal: {}", e);
    }

    info!("Shutting down, draining topic workers");
    let stopped = manager.stop().await;
    health_server.abort();
    stopped.wrap_err("Failed to stop topic workers cleanly")?;

    info!("Notifications worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;
        sigterm.recv().await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
