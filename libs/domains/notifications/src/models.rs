//! Notification message types.
//!
//! These are the JSON payloads carried in an envelope's `value`. Field names
//! are part of the wire contract shared with the identity and task services.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Email verification request, produced once per registration with an email.
///
/// `code` is minted by the identity service and opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationPayload {
    pub email: String,
    pub code: String,
    pub username: String,
}

impl VerificationPayload {
    pub fn new(
        email: impl Into<String>,
        code: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            code: code.into(),
            username: username.into(),
        }
    }
}

/// Kind of task mutation an event reports.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

/// Task lifecycle event, produced once per mutation of a task whose owner
/// has a verified email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub email: String,
    pub username: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub task_text: String,
    /// Previous text, set only for `update`. Missing and empty both decode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_old_text: Option<String>,
}

impl EventPayload {
    /// A task was created
    pub fn created(
        email: impl Into<String>,
        username: impl Into<String>,
        task_text: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            event_type: EventType::Create,
            task_text: task_text.into(),
            task_old_text: None,
        }
    }

    /// A task's text changed from `old_text` to `task_text`
    pub fn updated(
        email: impl Into<String>,
        username: impl Into<String>,
        task_text: impl Into<String>,
        old_text: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            event_type: EventType::Update,
            task_text: task_text.into(),
            task_old_text: Some(old_text.into()),
        }
    }

    /// A task was deleted
    pub fn deleted(
        email: impl Into<String>,
        username: impl Into<String>,
        task_text: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            event_type: EventType::Delete,
            task_text: task_text.into(),
            task_old_text: None,
        }
    }

    /// Previous text, treating an empty string as absent
    pub fn old_text(&self) -> Option<&str> {
        self.task_old_text.as_deref().filter(|t| !t.is_empty())
    }
}
