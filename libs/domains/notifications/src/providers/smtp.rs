//! SMTP email provider implementation using lettre.
//!
//! Works against real relays (TLS + credentials) and local catchers such as
//! MailHog/Mailpit (plain SMTP, no auth).

use super::{EmailContent, EmailProvider, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use core_config::{ConfigError, FromEnv, env_or_default, env_parse};
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// SMTP configuration.
#[derive(Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Sender email address.
    pub from_email: String,
    /// Sender name.
    pub from_name: String,
    /// SMTP username (optional for dev servers like Mailpit).
    pub username: Option<String>,
    /// SMTP password (optional for dev servers like Mailpit).
    pub password: Option<String>,
    /// Whether to use TLS (false for local dev servers).
    pub use_tls: bool,
}

impl SmtpConfig {
    /// Create a new SMTP configuration.
    pub fn new(host: String, port: u16, from_email: String, from_name: String) -> Self {
        Self {
            host,
            port,
            from_email,
            from_name,
            username: None,
            password: None,
            use_tls: false,
        }
    }

    /// Builder method to set TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

impl FromEnv for SmtpConfig {
    /// Defaults target a local MailHog/Mailpit on port 1025.
    fn from_env() -> Result<Self, ConfigError> {
        let use_tls = env_or_default("SMTP_USE_TLS", "false");

        Ok(Self {
            host: env_or_default("SMTP_HOST", "localhost"),
            port: env_parse("SMTP_PORT", 1025)?,
            from_email: env_or_default("SMTP_FROM_EMAIL", "noreply@localhost"),
            from_name: env_or_default("SMTP_FROM_NAME", "Notifications"),
            username: std::env::var("SMTP_USERNAME").ok().filter(|v| !v.is_empty()),
            password: std::env::var("SMTP_PASSWORD").ok().filter(|v| !v.is_empty()),
            use_tls: use_tls == "true" || use_tls == "1",
        })
    }
}

// Password stays out of logs
impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// SMTP email provider.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Arc<SmtpConfig>,
}

impl SmtpProvider {
    /// Create a new SMTP provider.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let transport = Self::build_transport(&config)?;
        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    /// Create a provider from `SMTP_*` environment variables.
    pub fn from_env() -> NotificationResult<Self> {
        Self::new(SmtpConfig::from_env()?)
    }

    /// Build the SMTP transport based on configuration.
    fn build_transport(config: &SmtpConfig) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| NotificationError::ProviderError(format!("Failed to create SMTP relay: {}", e)))?
                .port(config.port)
        } else {
            // Plain SMTP for local catchers
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host).port(config.port)
        };

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    /// Build a lettre Message from EmailContent.
    fn build_message(&self, email: &EmailContent) -> NotificationResult<Message> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| NotificationError::ConfigError(format!("Invalid from address: {}", e)))?;

        let to: Mailbox = if email.to_name.is_empty() {
            email.to_email.parse()
        } else {
            format!("{} <{}>", email.to_name, email.to_email).parse()
        }
        .map_err(|e| NotificationError::InvalidEmail(format!("{}: {}", email.to_email, e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )
            .map_err(|e| NotificationError::ProviderError(format!("Failed to build email message: {}", e)))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<SentEmail> {
        debug!(
            to = %email.to_email,
            subject = %email.subject,
            host = %self.config.host,
            port = %self.config.port,
            "Sending email via SMTP"
        );

        let message = self.build_message(email)?;

        let response = self.transport.send(message).await.map_err(|e| {
            error!(to = %email.to_email, error = %e, "Failed to send email via SMTP");
            NotificationError::ProviderError(format!("SMTP send failed: {}", e))
        })?;

        let message_id = response.message().next().map(|s| s.to_string());

        info!(
            to = %email.to_email,
            message_id = ?message_id,
            "Email sent successfully via SMTP"
        );

        Ok(SentEmail {
            message_id,
            accepted: response.is_positive(),
        })
    }

    fn name(&self) -> &'static str {
        "SMTP"
    }
}
