//! Single-use, time-limited tokens for password reset and email verification.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    PasswordReset,
    EmailVerification,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::PasswordReset => "password_reset",
            TokenPurpose::EmailVerification => "email_verification",
        }
    }
}

/// The side effect a token authorizes. The store applies it in the same
/// atomic step that marks the token used.
#[derive(Debug, Clone)]
pub enum TokenEffect {
    SetPassword { password_hash: String },
    VerifyEmail,
}

impl TokenEffect {
    pub fn purpose(&self) -> TokenPurpose {
        match self {
            TokenEffect::SetPassword { .. } => TokenPurpose::PasswordReset,
            TokenEffect::VerifyEmail => TokenPurpose::EmailVerification,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OneTimeToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub purpose: String,
    pub token_hash: String,
    pub expires_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl OneTimeToken {
    pub fn new(
        user_id: Uuid,
        purpose: TokenPurpose,
        token_hash: String,
        expires_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            purpose: purpose.as_str().to_string(),
            token_hash,
            expires_utc,
            used_utc: None,
            created_utc: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_utc
    }
}
