use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use utoipa::ToSchema;

use crate::config::SmtpConfig;

/// Outbound mail collaborator. Constructed once at start-up and injected.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError>;
}

/// Outcome of a notification attempt. A failed delivery never rolls back the
/// token it carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Sent,
    Failed,
}

/// Sends `message` and reports the outcome instead of failing the caller.
pub async fn dispatch(provider: &dyn EmailProvider, to: &str, message: &EmailMessage) -> Delivery {
    match provider.send(to, &message.subject, &message.html).await {
        Ok(()) => Delivery::Sent,
        Err(e) => {
            tracing::warn!(error = %e, subject = %message.subject, "Email delivery failed");
            Delivery::Failed
        }
    }
}

#[derive(Clone)]
pub struct EmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailService {
    /// STARTTLS relay with credentials when a user is configured, plain SMTP
    /// otherwise (local relays and mail catchers).
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| AppError::ConfigError(e.into()))?;

        let mailer = match (&config.user, &config.password) {
            (Some(user), Some(password)) => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e.to_string())))?
                    .credentials(Credentials::new(user.clone(), password.clone()))
                    .port(config.port)
                    .timeout(Some(Duration::from_secs(10)))
                    .build()
            }
            _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .timeout(Some(Duration::from_secs(10)))
                .build(),
        };

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self { mailer, from })
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(to
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::EmailError(e.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())?;

        match self.mailer.send(email).await {
            Ok(_) => {
                tracing::info!(subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, subject = %subject, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }
}

// ==================== Templates ====================

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub subject: String,
    pub html: String,
}

impl EmailMessage {
    pub fn password_reset(base_url: &str, token: &str, ttl_minutes: i64) -> Self {
        let link = format!("{}/reset-password?token={}", base_url, token);
        Self {
            subject: "Reset Your Password".to_string(),
            html: format!(
                r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>Password Reset Request</h2>
    <p>We received a request to reset your password. Click the link below to set a new password:</p>
    <p><a href="{link}">Reset Password</a></p>
    <p style="color: #666; font-size: 12px;">This link expires in {ttl_minutes} minutes. If you didn't request this, please ignore this email.</p>
  </body>
</html>"#
            ),
        }
    }

    pub fn email_verification(base_url: &str, token: &str, ttl_hours: i64) -> Self {
        let link = format!("{}/verify-email?token={}", base_url, token);
        Self {
            subject: "Verify Your Email Address".to_string(),
            html: format!(
                r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>Please verify your email</h2>
    <p>Click the link below to verify your email address:</p>
    <p><a href="{link}">Verify Email</a></p>
    <p style="color: #666; font-size: 12px;">This link expires in {ttl_hours} hours.</p>
  </body>
</html>"#
            ),
        }
    }

    pub fn invitation(
        base_url: &str,
        token: &str,
        organization: &str,
        role: &str,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let link = format!("{}/accept-invite?token={}", base_url, token);
        let organization = escape_html(organization);
        let role = escape_html(role);
        let expires = expires_at.format("%Y-%m-%d %H:%M UTC");
        Self {
            subject: format!("You've been invited to join {}", organization),
            html: format!(
                r#"<html>
  <body style="font-family: Arial, sans-serif;">
    <h2>Join {organization}</h2>
    <p>You have been invited to join <strong>{organization}</strong> as <strong>{role}</strong>.</p>
    <p><a href="{link}">Accept Invitation</a></p>
    <p style="color: #666; font-size: 12px;">This invitation expires on {expires}.</p>
  </body>
</html>"#
            ),
        }
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ==================== Mock ====================

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Records every message instead of sending it. Can be switched to fail, in
/// which case the message is kept apart as undelivered.
#[derive(Clone, Default)]
pub struct MockEmailService {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    undelivered: Arc<Mutex<Vec<SentEmail>>>,
    failing: Arc<AtomicBool>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Most recent message addressed to `to`.
    pub fn last_to(&self, to: &str) -> Option<SentEmail> {
        self.sent().into_iter().rev().find(|m| m.to == to)
    }

    /// Most recent message to `to` that failed to send.
    pub fn last_undelivered_to(&self, to: &str) -> Option<SentEmail> {
        self.undelivered
            .lock()
            .ok()
            .and_then(|u| u.iter().rev().find(|m| m.to == to).cloned())
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), AppError> {
        let message = SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        };
        if self.failing.load(Ordering::SeqCst) {
            if let Ok(mut undelivered) = self.undelivered.lock() {
                undelivered.push(message);
            }
            return Err(AppError::EmailError("mock transport is down".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_email_service_creation() {
        let config = SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            user: None,
            password: None,
            from: "no-reply@example.test".to_string(),
        };
        assert!(EmailService::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_from_address_rejected() {
        let config = SmtpConfig {
            host: "localhost".to_string(),
            port: 1025,
            user: None,
            password: None,
            from: "not an address".to_string(),
        };
        assert!(EmailService::new(&config).is_err());
    }

    #[test]
    fn test_invitation_escapes_organization_name() {
        let message = EmailMessage::invitation(
            "https://app.example.test",
            "abc",
            "<script>Acme</script>",
            "manager",
            Utc::now(),
        );
        assert!(!message.html.contains("<script>"));
        assert!(message.html.contains("accept-invite?token=abc"));
    }

    #[tokio::test]
    async fn test_dispatch_reports_failure() {
        let mock = MockEmailService::new();
        let message = EmailMessage::password_reset("https://app.example.test", "tok", 60);

        assert_eq!(dispatch(&mock, "a@example.test", &message).await, Delivery::Sent);
        mock.set_failing(true);
        assert_eq!(dispatch(&mock, "a@example.test", &message).await, Delivery::Failed);
        assert_eq!(mock.sent().len(), 1);
        assert!(mock
            .last_undelivered_to("a@example.test")
            .is_some_and(|m| m.html.contains("token=tok")));
    }
}
