//! Error types for the notifications domain.

use event_pipeline::PipelineError;
use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Email provider error.
    #[error("Email provider error: {0}")]
    ProviderError(String),

    /// Template rendering error.
    #[error("Template rendering error: {0}")]
    TemplateError(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Event could not be published.
    #[error("Publish error: {0}")]
    Publish(#[from] PipelineError),
}

impl From<core_config::ConfigError> for NotificationError {
    fn from(err: core_config::ConfigError) -> Self {
        NotificationError::ConfigError(err.to_string())
    }
}
