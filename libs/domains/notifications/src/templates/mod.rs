//! Email template rendering engine.
//!
//! This module provides Handlebars-based template rendering for emails.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{EventPayload, EventType, VerificationPayload};
use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Minutes a verification code stays valid; the identity service owns the expiry
pub const VERIFICATION_CODE_TTL_MINUTES: u32 = 15;

/// Rendered email content.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    /// HTML body content.
    pub html: String,
    /// Plain text body content.
    pub text: String,
    /// Email subject line.
    pub subject: String,
}

#[derive(Serialize)]
struct VerificationData<'a> {
    username: &'a str,
    code: &'a str,
    ttl_minutes: u32,
}

#[derive(Serialize)]
struct EventData<'a> {
    username: &'a str,
    headline: &'static str,
    task_text: &'a str,
    task_old_text: Option<&'a str>,
}

/// Template engine for rendering email templates.
#[derive(Clone)]
pub struct TemplateEngine {
    handlebars: Arc<Handlebars<'static>>,
}

impl TemplateEngine {
    /// Create a new template engine with all templates registered.
    pub fn new() -> NotificationResult<Self> {
        let mut handlebars = Handlebars::new();

        for (name, template) in [
            ("verification_html", VERIFICATION_HTML_TEMPLATE),
            ("verification_text", VERIFICATION_TEXT_TEMPLATE),
            ("event_html", EVENT_HTML_TEMPLATE),
            ("event_text", EVENT_TEXT_TEMPLATE),
        ] {
            handlebars.register_template_string(name, template).map_err(|e| {
                NotificationError::TemplateError(format!("Failed to register {}: {}", name, e))
            })?;
        }

        Ok(Self {
            handlebars: Arc::new(handlebars),
        })
    }

    /// Render a template with the given data.
    fn render<T: Serialize>(&self, template_name: &str, data: &T) -> NotificationResult<String> {
        self.handlebars
            .render(template_name, data)
            .map_err(|e| NotificationError::TemplateError(e.to_string()))
    }

    /// Render the verification code email.
    pub fn render_verification(&self, payload: &VerificationPayload) -> NotificationResult<RenderedEmail> {
        debug!(user = %payload.username, "Rendering verification email");

        let data = VerificationData {
            username: &payload.username,
            code: &payload.code,
            ttl_minutes: VERIFICATION_CODE_TTL_MINUTES,
        };

        Ok(RenderedEmail {
            html: self.render("verification_html", &data)?,
            text: self.render("verification_text", &data)?,
            subject: "Confirm your email address".to_string(),
        })
    }

    /// Render a task event email.
    pub fn render_event(&self, payload: &EventPayload) -> NotificationResult<RenderedEmail> {
        debug!(user = %payload.username, event_type = %payload.event_type, "Rendering event email");

        let (headline, subject) = match payload.event_type {
            EventType::Create => ("A new task was created", "Task created"),
            EventType::Update => ("One of your tasks was updated", "Task updated"),
            EventType::Delete => ("One of your tasks was deleted", "Task deleted"),
        };

        // Old text only makes sense next to the new one
        let task_old_text = match payload.event_type {
            EventType::Update => payload.old_text(),
            _ => None,
        };

        let data = EventData {
            username: &payload.username,
            headline,
            task_text: &payload.task_text,
            task_old_text,
        };

        Ok(RenderedEmail {
            html: self.render("event_html", &data)?,
            text: self.render("event_text", &data)?,
            subject: subject.to_string(),
        })
    }
}

const VERIFICATION_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>Confirm your email address</title>
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background-color: #f4f4f5;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 600px; margin: 0 auto; padding: 40px 20px;">
    <tr>
      <td style="background-color: #ffffff; border-radius: 8px; padding: 40px; border: 1px solid #e4e4e7;">
        <h1 style="color: #18181b; font-size: 22px; font-weight: 600; margin: 0 0 16px 0;">
          Hello, {{username}}!
        </h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px; margin: 0 0 16px 0;">
          To finish signing up, enter this verification code:
        </p>
        <p style="color: #2563eb; font-size: 32px; font-weight: 700; text-align: center; letter-spacing: 4px; margin: 24px 0; padding: 12px; background-color: #f8fafc; border-radius: 4px;">
          {{code}}
        </p>
        <p style="color: #52525b; font-size: 14px; margin: 0;">
          The code is valid for {{ttl_minutes}} minutes.
        </p>
      </td>
    </tr>
    <tr>
      <td style="padding: 24px 0; text-align: center;">
        <p style="color: #71717a; font-size: 12px; margin: 0;">
          If you did not request this email, you can safely ignore it.
        </p>
      </td>
    </tr>
  </table>
</body>
</html>"#;

const VERIFICATION_TEXT_TEMPLATE: &str = r#"Hello, {{{username}}}!

To finish signing up, enter this verification code:

    {{{code}}}

The code is valid for {{ttl_minutes}} minutes.

---
If you did not request this email, you can safely ignore it."#;

const EVENT_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>{{headline}}</title>
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; background-color: #f4f4f5;">
  <table role="presentation" width="100%" cellspacing="0" cellpadding="0" style="max-width: 600px; margin: 0 auto; padding: 40px 20px;">
    <tr>
      <td style="background-color: #ffffff; border-radius: 8px; padding: 40px; border: 1px solid #e4e4e7;">
        <h1 style="color: #18181b; font-size: 22px; font-weight: 600; margin: 0 0 16px 0;">
          Hello, {{username}}!
        </h1>
        <p style="color: #52525b; font-size: 16px; line-height: 24px; margin: 0 0 16px 0;">
          {{headline}}:
        </p>
        {{#if task_old_text}}
        <p style="color: #71717a; font-size: 14px; margin: 0 0 4px 0;">Before</p>
        <p style="color: #71717a; font-size: 16px; text-decoration: line-through; margin: 0 0 16px 0; padding: 12px; background-color: #fafafa; border-radius: 4px;">
          {{task_old_text}}
        </p>
        <p style="color: #71717a; font-size: 14px; margin: 0 0 4px 0;">After</p>
        {{/if}}
        <p style="color: #18181b; font-size: 16px; margin: 0; padding: 12px; background-color: #f8fafc; border-radius: 4px;">
          {{task_text}}
        </p>
      </td>
    </tr>
  </table>
</body>
</html>"#;

// Plain text is not HTML, so values are emitted unescaped
const EVENT_TEXT_TEMPLATE: &str = r#"Hello, {{{username}}}!

{{headline}}:
{{#if task_old_text}}

Before: {{{task_old_text}}}
After:  {{{task_text}}}
{{else}}

    {{{task_text}}}
{{/if}}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_engine_creation() {
        let engine = TemplateEngine::new();
        assert!(engine.is_ok());
    }

    #[test]
    fn test_render_verification_email() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render_verification(&VerificationPayload::new("a@x.com", "4821", "alice"))
            .unwrap();

        assert!(rendered.html.contains("Hello, alice!"));
        assert!(rendered.html.contains("4821"));
        assert!(rendered.text.contains("4821"));
        assert!(rendered.text.contains("valid for 15 minutes"));
        assert_eq!(rendered.subject, "Confirm your email address");
    }

    #[test]
    fn test_render_update_shows_old_and_new_text() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render_event(&EventPayload::updated("a@x.com", "alice", "buy oat milk", "buy milk"))
            .unwrap();

        assert_eq!(rendered.subject, "Task updated");
        assert!(rendered.text.contains("Before: buy milk"));
        assert!(rendered.text.contains("After:  buy oat milk"));
        assert!(rendered.html.contains("buy milk"));
        assert!(rendered.html.contains("buy oat milk"));
    }

    #[test]
    fn test_render_create_and_delete_wording() {
        let engine = TemplateEngine::new().unwrap();

        let created = engine
            .render_event(&EventPayload::created("a@x.com", "alice", "water plants"))
            .unwrap();
        assert_eq!(created.subject, "Task created");
        assert!(created.text.contains("A new task was created"));
        assert!(created.text.contains("water plants"));
        assert!(!created.text.contains("Before:"));

        let deleted = engine
            .render_event(&EventPayload::deleted("a@x.com", "alice", "water plants"))
            .unwrap();
        assert_eq!(deleted.subject, "Task deleted");
        assert!(deleted.html.contains("One of your tasks was deleted"));
    }

    #[test]
    fn test_html_escapes_task_text() {
        let engine = TemplateEngine::new().unwrap();
        let rendered = engine
            .render_event(&EventPayload::created("a@x.com", "alice", "<script>x</script>"))
            .unwrap();

        assert!(!rendered.html.contains("<script>"));
        assert!(rendered.html.contains("&lt;script&gt;"));
    }
}
