//! Worker settings loaded from the environment.

use core_config::health::HealthServerConfig;
use core_config::redis::RedisConfig;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse};
use domain_notifications::{NotificationTopics, SmtpConfig};
use event_pipeline::{ConsumerConfig, RetryPolicy};
use std::time::Duration;

pub const DEFAULT_GROUP_ID: &str = "notifications";

/// Everything the worker needs to run
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub redis: RedisConfig,
    pub topics: NotificationTopics,
    /// Consumer group shared by every worker instance
    pub group_id: String,
    /// This instance's name within the group. A stable name replays its own
    /// unacknowledged entries on restart; otherwise peers claim them once idle.
    pub consumer_id: String,
    pub poll_interval: Duration,
    pub claim_idle: Duration,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub smtp: SmtpConfig,
    pub health: HealthServerConfig,
}

impl WorkerSettings {
    /// Consumer configuration for the manager
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(self.group_id.clone())
            .with_consumer_id(self.consumer_id.clone())
            .with_poll_interval(self.poll_interval)
            .with_claim_idle(self.claim_idle)
            .with_batch_size(self.batch_size)
            .with_retry(self.retry)
    }
}

impl FromEnv for WorkerSettings {
    /// - REDIS_URL (required), REDIS_STREAM_PARTITIONS, REDIS_STREAM_MAX_LEN
    /// - EMAIL_VERIFICATION_TOPIC, EVENTS_TOPIC
    /// - NOTIFICATIONS_GROUP_ID: defaults to "notifications"
    /// - NOTIFICATIONS_CONSUMER_ID: defaults to HOSTNAME (pod name), then a random id
    /// - NOTIFICATIONS_POLL_INTERVAL_MS: defaults to 500
    /// - NOTIFICATIONS_CLAIM_IDLE_MS: defaults to 30000
    /// - NOTIFICATIONS_BATCH_SIZE: defaults to 10
    /// - NOTIFICATIONS_MAX_ATTEMPTS: defaults to 3
    /// - NOTIFICATIONS_RETRY_UNIT_MS: defaults to 1000
    /// - SMTP_* and HEALTH_HOST/HEALTH_PORT
    fn from_env() -> Result<Self, ConfigError> {
        let consumer_id = std::env::var("NOTIFICATIONS_CONSUMER_ID")
            .or_else(|_| std::env::var("HOSTNAME"))
            .ok()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("notifications-{}", uuid::Uuid::new_v4()));

        let batch_size: usize = env_parse("NOTIFICATIONS_BATCH_SIZE", 10)?;
        if batch_size == 0 {
            return Err(ConfigError::ParseError {
                key: "NOTIFICATIONS_BATCH_SIZE".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        let max_attempts: u32 = env_parse("NOTIFICATIONS_MAX_ATTEMPTS", 3)?;
        let retry_unit_ms: u64 = env_parse("NOTIFICATIONS_RETRY_UNIT_MS", 1000)?;
        let poll_interval_ms: u64 = env_parse("NOTIFICATIONS_POLL_INTERVAL_MS", 500)?;
        let claim_idle_ms: u64 = env_parse("NOTIFICATIONS_CLAIM_IDLE_MS", 30_000)?;

        Ok(Self {
            redis: RedisConfig::from_env()?,
            topics: NotificationTopics::from_env()?,
            group_id: env_or_default("NOTIFICATIONS_GROUP_ID", DEFAULT_GROUP_ID),
            consumer_id,
            poll_interval: Duration::from_millis(poll_interval_ms),
            claim_idle: Duration::from_millis(claim_idle_ms),
            batch_size,
            retry: RetryPolicy::new(max_attempts, Duration::from_millis(retry_unit_ms)),
            smtp: SmtpConfig::from_env()?,
            health: HealthServerConfig::from_env()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 11] = [
        "EMAIL_VERIFICATION_TOPIC",
        "EVENTS_TOPIC",
        "NOTIFICATIONS_GROUP_ID",
        "NOTIFICATIONS_POLL_INTERVAL_MS",
        "NOTIFICATIONS_CLAIM_IDLE_MS",
        "NOTIFICATIONS_BATCH_SIZE",
        "NOTIFICATIONS_MAX_ATTEMPTS",
        "NOTIFICATIONS_RETRY_UNIT_MS",
        "REDIS_STREAM_PARTITIONS",
        "HEALTH_PORT",
        "SMTP_PORT",
    ];

    fn with_clean_env<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        temp_env::with_vars_unset(VARS, || temp_env::with_vars(vars.to_vec(), f))
    }

    #[test]
    fn test_settings_defaults() {
        with_clean_env(
            &[
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("NOTIFICATIONS_CONSUMER_ID", Some("worker-0")),
            ],
            || {
                let settings = WorkerSettings::from_env().unwrap();
                assert_eq!(settings.redis.url, "redis://localhost:6379");
                assert_eq!(settings.redis.partitions, 1);
                assert_eq!(settings.topics, NotificationTopics::default());
                assert_eq!(settings.group_id, "notifications");
                assert_eq!(settings.consumer_id, "worker-0");
                assert_eq!(settings.poll_interval, Duration::from_millis(500));
                assert_eq!(settings.claim_idle, Duration::from_secs(30));
                assert_eq!(settings.retry, RetryPolicy::default());
                assert_eq!(settings.health.port, 8081);
                assert_eq!(settings.smtp.port, 1025);
            },
        );
    }

    #[test]
    fn test_settings_require_redis_url() {
        with_clean_env(&[("REDIS_URL", None)], || {
            let err = WorkerSettings::from_env().unwrap_err();
            assert!(err.to_string().contains("REDIS_URL"));
        });
    }

    #[test]
    fn test_consumer_id_falls_back_to_hostname() {
        with_clean_env(
            &[
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("NOTIFICATIONS_CONSUMER_ID", None),
                ("HOSTNAME", Some("notifications-7d9f")),
            ],
            || {
                let settings = WorkerSettings::from_env().unwrap();
                assert_eq!(settings.consumer_id, "notifications-7d9f");
            },
        );

        with_clean_env(
            &[
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("NOTIFICATIONS_CONSUMER_ID", None),
                ("HOSTNAME", None),
            ],
            || {
                let settings = WorkerSettings::from_env().unwrap();
                assert!(settings.consumer_id.starts_with("notifications-"));
            },
        );
    }

    #[test]
    fn test_consumer_config_from_settings() {
        with_clean_env(
            &[
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("NOTIFICATIONS_CONSUMER_ID", Some("worker-1")),
                ("NOTIFICATIONS_GROUP_ID", Some("mailers")),
                ("NOTIFICATIONS_POLL_INTERVAL_MS", Some("250")),
                ("NOTIFICATIONS_CLAIM_IDLE_MS", Some("5000")),
                ("NOTIFICATIONS_MAX_ATTEMPTS", Some("5")),
                ("NOTIFICATIONS_RETRY_UNIT_MS", Some("200")),
            ],
            || {
                let config = WorkerSettings::from_env().unwrap().consumer_config();
                assert_eq!(config.group_id, "mailers");
                assert_eq!(config.consumer_id, "worker-1");
                assert_eq!(config.poll_interval, Duration::from_millis(250));
                assert_eq!(config.claim_idle, Duration::from_secs(5));
                assert_eq!(config.retry.max_attempts, 5);
                assert_eq!(config.retry.backoff_unit, Duration::from_millis(200));
            },
        );
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        with_clean_env(
            &[
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("NOTIFICATIONS_BATCH_SIZE", Some("0")),
            ],
            || {
                assert!(WorkerSettings::from_env().is_err());
            },
        );

        with_clean_env(
            &[
                ("REDIS_URL", Some("redis://localhost:6379")),
                ("NOTIFICATIONS_RETRY_UNIT_MS", Some("soon")),
            ],
            || {
                let err = WorkerSettings::from_env().unwrap_err();
                assert!(err.to_string().contains("NOTIFICATIONS_RETRY_UNIT_MS"));
            },
        );
    }
}
