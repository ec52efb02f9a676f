//! Notifications Domain
//!
//! Turns identity and task events into outbound emails.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ Identity / Tasks svc │  ← NotificationPublisher::notify_*
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │   Redis Streams      │  ← email-verification, events
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │   ConsumerManager    │  ← one TopicWorker per topic
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │ Verification/Event   │  ← decode payload, call Notifier
//! │ handlers             │
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │ EmailNotifier        │  ← Handlebars templates + SMTP
//! └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{EmailNotifier, NotificationTopics, SmtpProvider, build_registry};
//!
//! let notifier = Arc::new(EmailNotifier::new(Arc::new(SmtpProvider::from_env()?))?);
//! let registry = build_registry(&NotificationTopics::from_env()?, notifier)?;
//! let mut manager = ConsumerManager::new(transport, registry, consumer_config);
//! manager.start().await?;
//! ```

pub mod email;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notifier;
pub mod providers;
pub mod publisher;
pub mod templates;
pub mod topics;

// Re-export commonly used types
pub use email::EmailNotifier;
pub use error::{NotificationError, NotificationResult};
pub use handlers::{TaskEventHandler, VerificationHandler, build_registry};
pub use models::{EventPayload, EventType, VerificationPayload};
pub use notifier::Notifier;
pub use providers::{EmailProvider, SmtpConfig, SmtpProvider};
pub use publisher::NotificationPublisher;
pub use templates::TemplateEngine;
pub use topics::NotificationTopics;
