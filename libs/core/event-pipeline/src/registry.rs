//! Handler registry.
//!
//! This module provides:
//! - `MessageHandler` trait implemented by every per-topic handler
//! - `HandlerRegistry` mapping a topic name to its handler

use crate::envelope::Envelope;
use crate::error::PipelineError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Trait for per-topic message handlers.
///
/// A handler decodes its topic's payload and invokes the corresponding
/// business action. Returning a `Decode` error ends the message's retry
/// sequence immediately; any `Handler` error is retried by the worker.
///
/// # Example
///
/// ```rust,ignore
/// use event_pipeline::{Envelope, MessageHandler, PipelineError};
///
/// struct VerificationHandler {
///     notifier: Arc<dyn Notifier>,
/// }
///
/// #[async_trait]
/// impl MessageHandler for VerificationHandler {
///     async fn handle(&self, envelope: &Envelope) -> Result<(), PipelineError> {
///         let payload: VerificationPayload = envelope.decode()?;
///         self.notifier
///             .send_verification_email(&payload)
///             .await
///             .map_err(|e| PipelineError::handler(e.to_string()))
///     }
///
///     fn name(&self) -> &'static str {
///         "VerificationHandler"
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a single envelope.
    async fn handle(&self, envelope: &Envelope) -> Result<(), PipelineError>;

    /// Get the handler name for logging.
    fn name(&self) -> &'static str;
}

/// Topic name to handler mapping.
///
/// Topics are iterated in name order so workers start deterministically.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic.
    ///
    /// Registering the same topic twice is a configuration error.
    pub fn register(
        &mut self,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PipelineError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(PipelineError::Config("topic name must not be empty".into()));
        }
        if self.handlers.contains_key(&topic) {
            return Err(PipelineError::DuplicateTopic(topic));
        }
        self.handlers.insert(topic, handler);
        Ok(())
    }

    /// Builder-style registration
    pub fn with_handler(
        mut self,
        topic: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, PipelineError> {
        self.register(topic, handler)?;
        Ok(self)
    }

    /// Look up the handler for a topic
    pub fn get(&self, topic: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(topic).cloned()
    }

    /// Registered topic names
    pub fn topics(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Iterate over `(topic, handler)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn MessageHandler>)> {
        self.handlers.iter().map(|(t, h)| (t.as_str(), h))
    }

    /// Number of registered topics
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(t, h)| (t, h.name())))
            .finish()
    }
}
