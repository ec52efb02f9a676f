//! Pipeline error types and error categorization
//!
//! Errors are categorized to decide what the worker does with them:
//! - **Transport**: broker unreachable or reader failure, retried indefinitely at the pull layer
//! - **Decode**: malformed payload, permanent for that message
//! - **Business**: the handler's action failed, retried with bounded backoff
//! - **Shutdown**: normal termination, never reported as a failure
//! - **Configuration**: surfaced synchronously to the caller

use std::time::Duration;
use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Broker or connection failure
    Transport,
    /// Payload could not be decoded
    Decode,
    /// Business action (e.g. sending an email) failed
    Business,
    /// Shutdown in progress
    Shutdown,
    /// Misconfiguration detected at call time
    Configuration,
}

impl ErrorCategory {
    /// Whether a handler attempt failing with this category may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transport | ErrorCategory::Business)
    }

    /// Label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Decode => "decode",
            ErrorCategory::Business => "business",
            ErrorCategory::Shutdown => "shutdown",
            ErrorCategory::Configuration => "configuration",
        }
    }
}

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Generic transport failure (reader, in-memory broker, ...)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Decode error: {0}")]
    Decode(String),

    /// Handler's business action failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// Publish was not acknowledged
    #[error("Delivery to topic '{topic}' failed: {reason}")]
    DeliveryFailed { topic: String, reason: String },

    /// Publish deadline elapsed before the broker acknowledged
    #[error("Delivery to topic '{topic}' timed out after {timeout:?}")]
    DeliveryTimeout { topic: String, timeout: Duration },

    /// Producer used after `close()`
    #[error("Producer is closed")]
    ProducerClosed,

    /// A handler is already registered for this topic
    #[error("Handler already registered for topic '{0}'")]
    DuplicateTopic(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown requested
    #[error("Shutdown requested")]
    Shutdown,
}

impl PipelineError {
    /// Create a business-action error
    pub fn handler(message: impl Into<String>) -> Self {
        PipelineError::Handler(message.into())
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        PipelineError::Transport(message.into())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Redis(_) => ErrorCategory::Transport,
            PipelineError::Transport(_) => ErrorCategory::Transport,
            PipelineError::Decode(_) => ErrorCategory::Decode,
            PipelineError::Handler(_) => ErrorCategory::Business,
            PipelineError::DeliveryFailed { .. } => ErrorCategory::Transport,
            PipelineError::DeliveryTimeout { .. } => ErrorCategory::Transport,
            PipelineError::ProducerClosed => ErrorCategory::Configuration,
            PipelineError::DuplicateTopic(_) => ErrorCategory::Configuration,
            PipelineError::Config(_) => ErrorCategory::Configuration,
            PipelineError::Shutdown => ErrorCategory::Shutdown,
        }
    }

    /// Check if a failed handler attempt should be followed by another one
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Check if the consumer group vanished (e.g. stream deleted under us)
    pub fn is_nogroup_error(&self) -> bool {
        matches!(self, PipelineError::Redis(e) if e.to_string().contains("NOGROUP"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Decode(err.to_string())
    }
}
