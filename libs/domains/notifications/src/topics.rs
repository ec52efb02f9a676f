//! Topic names used by producers and the notifications worker.

use core_config::{ConfigError, FromEnv, env_or_default};

pub const DEFAULT_VERIFICATION_TOPIC: &str = "email-verification";
pub const DEFAULT_EVENTS_TOPIC: &str = "events";

/// Names of the two notification topics.
///
/// Deployments can rename them; producers and consumers must agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTopics {
    /// Verification code emails
    pub verification: String,
    /// Task lifecycle emails
    pub events: String,
}

impl NotificationTopics {
    pub fn new(verification: impl Into<String>, events: impl Into<String>) -> Self {
        Self {
            verification: verification.into(),
            events: events.into(),
        }
    }
}

impl Default for NotificationTopics {
    fn default() -> Self {
        Self::new(DEFAULT_VERIFICATION_TOPIC, DEFAULT_EVENTS_TOPIC)
    }
}

impl FromEnv for NotificationTopics {
    fn from_env() -> Result<Self, ConfigError> {
        let verification = env_or_default("EMAIL_VERIFICATION_TOPIC", DEFAULT_VERIFICATION_TOPIC);
        let events = env_or_default("EVENTS_TOPIC", DEFAULT_EVENTS_TOPIC);

        if verification.is_empty() || events.is_empty() {
            return Err(ConfigError::ParseError {
                key: "EMAIL_VERIFICATION_TOPIC/EVENTS_TOPIC".to_string(),
                details: "topic names must not be empty".to_string(),
            });
        }
        if verification == events {
            return Err(ConfigError::ParseError {
                key: "EVENTS_TOPIC".to_string(),
                details: format!("must differ from the verification topic '{}'", verification),
            });
        }

        Ok(Self { verification, events })
    }
}
