//! User model - organization-scoped accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// User status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

/// User entity.
///
/// `mfa_secret` is the base32 TOTP seed; it is present only while MFA is
/// being set up or is enabled.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role_id: Uuid,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    pub mfa_verified: bool,
    pub mfa_secret: Option<String>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl User {
    pub fn new(
        organization_id: Uuid,
        email: &str,
        name: String,
        password_hash: String,
        role_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            email: normalize_email(email),
            name,
            password_hash,
            role_id,
            email_verified: false,
            mfa_enabled: false,
            mfa_verified: false,
            mfa_secret: None,
            status: UserStatus::Active.as_str().to_string(),
            created_utc: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active.as_str()
    }
}

/// Emails are compared case-insensitively everywhere.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
