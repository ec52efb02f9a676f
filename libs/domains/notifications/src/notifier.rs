//! The business action behind each notification topic.

use crate::error::NotificationResult;
use crate::models::{EventPayload, VerificationPayload};
use async_trait::async_trait;

/// Sends notification emails.
///
/// Deliveries are at-least-once, so implementations may be called more than
/// once for the same payload. A repeated call must be safe beyond producing a
/// duplicate email.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send the verification code to the registering user
    async fn send_verification_email(&self, payload: &VerificationPayload) -> NotificationResult<()>;

    /// Tell a task owner about a create/update/delete
    async fn send_event_email(&self, payload: &EventPayload) -> NotificationResult<()>;
}
