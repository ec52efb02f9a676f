//! Producer call sites for the identity and task services.
//!
//! Events are keyed by recipient email so one user's notifications land on the
//! same partition. Publishing happens after the business action committed, so
//! the `notify_*` variants only log failures and never fail the caller.

use crate::error::NotificationResult;
use crate::models::{EventPayload, VerificationPayload};
use crate::topics::NotificationTopics;
use event_pipeline::{DeliveryReceipt, Envelope, Producer};
use std::sync::Arc;
use tracing::{debug, warn};

/// Publishes notification events through a shared [`Producer`]
#[derive(Clone)]
pub struct NotificationPublisher {
    producer: Arc<Producer>,
    topics: NotificationTopics,
}

impl NotificationPublisher {
    pub fn new(producer: Arc<Producer>, topics: NotificationTopics) -> Self {
        Self { producer, topics }
    }

    pub fn topics(&self) -> &NotificationTopics {
        &self.topics
    }

    /// Publish a verification request, waiting for the broker acknowledgement
    pub async fn publish_verification(
        &self,
        payload: &VerificationPayload,
    ) -> NotificationResult<DeliveryReceipt> {
        let envelope = Envelope::encode(self.topics.verification.clone(), payload.email.as_str(), payload)?;
        Ok(self
            .producer
            .send_with_deadline(&envelope, self.producer.deadline())
            .await?)
    }

    /// Publish a task event.
    ///
    /// Returns `Ok(None)` without publishing when the owner has no email.
    pub async fn publish_task_event(
        &self,
        payload: &EventPayload,
    ) -> NotificationResult<Option<DeliveryReceipt>> {
        if payload.email.is_empty() {
            debug!(username = %payload.username, "No verified email, skipping task event");
            return Ok(None);
        }

        let envelope = Envelope::encode(self.topics.events.clone(), payload.email.as_str(), payload)?;
        let receipt = self
            .producer
            .send_with_deadline(&envelope, self.producer.deadline())
            .await?;
        Ok(Some(receipt))
    }

    /// Fire-and-log variant of [`publish_verification`](Self::publish_verification)
    pub async fn notify_verification(&self, payload: &VerificationPayload) {
        if let Err(e) = self.publish_verification(payload).await {
            warn!(
                topic = %self.topics.verification,
                email = %payload.email,
                error = %e,
                "Failed to publish verification email request"
            );
        }
    }

    /// Fire-and-log variant of [`publish_task_event`](Self::publish_task_event)
    pub async fn notify_task_event(&self, payload: &EventPayload) {
        if let Err(e) = self.publish_task_event(payload).await {
            warn!(
                topic = %self.topics.events,
                email = %payload.email,
                event_type = %payload.event_type,
                error = %e,
                "Failed to publish task event"
            );
        }
    }
}
