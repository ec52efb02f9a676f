//! `Notifier` backed by Handlebars templates and an email provider.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{EventPayload, VerificationPayload};
use crate::notifier::Notifier;
use crate::providers::{EmailContent, EmailProvider};
use crate::templates::{RenderedEmail, TemplateEngine};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

/// Renders notification emails and hands them to an [`EmailProvider`].
pub struct EmailNotifier {
    templates: TemplateEngine,
    provider: Arc<dyn EmailProvider>,
}

impl EmailNotifier {
    pub fn new(provider: Arc<dyn EmailProvider>) -> NotificationResult<Self> {
        Ok(Self {
            templates: TemplateEngine::new()?,
            provider,
        })
    }

    /// Provider name, for logs
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    async fn deliver(&self, to_email: &str, to_name: &str, rendered: RenderedEmail) -> NotificationResult<()> {
        let email = EmailContent {
            to_email: to_email.to_string(),
            to_name: to_name.to_string(),
            subject: rendered.subject,
            html_body: rendered.html,
            text_body: rendered.text,
        };

        let sent = self.provider.send(&email).await?;
        if !sent.accepted {
            return Err(NotificationError::ProviderError(format!(
                "{} did not accept the email to {}",
                self.provider.name(),
                to_email
            )));
        }

        info!(
            to = %to_email,
            provider = self.provider.name(),
            message_id = ?sent.message_id,
            "Notification email sent"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip_all, fields(to = %payload.email))]
    async fn send_verification_email(&self, payload: &VerificationPayload) -> NotificationResult<()> {
        let rendered = self.templates.render_verification(payload)?;
        self.deliver(&payload.email, &payload.username, rendered).await
    }

    #[instrument(skip_all, fields(to = %payload.email, event_type = %payload.event_type))]
    async fn send_event_email(&self, payload: &EventPayload) -> NotificationResult<()> {
        let rendered = self.templates.render_event(payload)?;
        self.deliver(&payload.email, &payload.username, rendered).await
    }
}
