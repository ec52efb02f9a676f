//! Per-topic message handlers.
//!
//! Each handler decodes its topic's payload and calls the matching
//! [`Notifier`] action. A payload that does not decode is a `Decode` error
//! (dropped without retry); a notifier failure is a `Handler` error (retried).

use crate::models::{EventPayload, VerificationPayload};
use crate::notifier::Notifier;
use crate::topics::NotificationTopics;
use async_trait::async_trait;
use event_pipeline::{Envelope, HandlerRegistry, MessageHandler, PipelineError};
use std::sync::Arc;
use tracing::info;

/// Handles the verification topic
pub struct VerificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl VerificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl MessageHandler for VerificationHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), PipelineError> {
        let payload: VerificationPayload = envelope.decode()?;
        info!(email = %payload.email, "Received verification email request");

        self.notifier
            .send_verification_email(&payload)
            .await
            .map_err(|e| PipelineError::handler(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "VerificationHandler"
    }
}

/// Handles the task events topic
pub struct TaskEventHandler {
    notifier: Arc<dyn Notifier>,
}

impl TaskEventHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl MessageHandler for TaskEventHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), PipelineError> {
        let payload: EventPayload = envelope.decode()?;
        info!(email = %payload.email, event_type = %payload.event_type, "Received event request");

        self.notifier
            .send_event_email(&payload)
            .await
            .map_err(|e| PipelineError::handler(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "TaskEventHandler"
    }
}

/// Registry with both notification topics bound to `notifier`
pub fn build_registry(
    topics: &NotificationTopics,
    notifier: Arc<dyn Notifier>,
) -> Result<HandlerRegistry, PipelineError> {
    HandlerRegistry::new()
        .with_handler(
            topics.verification.clone(),
            Arc::new(VerificationHandler::new(Arc::clone(&notifier))),
        )?
        .with_handler(topics.events.clone(), Arc::new(TaskEventHandler::new(notifier)))
}
