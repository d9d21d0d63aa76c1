use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Permission, Role, User};
use crate::services::{Delivery, TokenBundle};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterOrganizationRequest {
    #[validate(length(min = 1, max = 200, message = "Organization name is required"))]
    #[schema(example = "Acme Recovery")]
    pub organization_name: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "admin@acme.example")]
    pub admin_email: String,

    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    #[schema(example = "Alice Admin")]
    pub admin_name: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Sup3rSecret")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterOrganizationResponse {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub delivery: Delivery,
    #[schema(example = "Organization created. Check your email to verify your account.")]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "admin@acme.example")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "Sup3rSecret")]
    pub password: String,

    #[schema(example = "Firefox on macOS")]
    pub device_info: Option<String>,
}

/// Either an MFA challenge or a full token set.
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub requires_mfa: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

impl LoginResponse {
    pub fn challenge(mfa_token: String) -> Self {
        Self {
            requires_mfa: true,
            mfa_token: Some(mfa_token),
            access_token: None,
            refresh_token: None,
            token_type: None,
            expires_in: None,
            session_id: None,
        }
    }
}

impl From<TokenBundle> for LoginResponse {
    fn from(bundle: TokenBundle) -> Self {
        Self {
            requires_mfa: false,
            mfa_token: None,
            access_token: Some(bundle.access_token),
            refresh_token: Some(bundle.refresh_token),
            token_type: Some(bundle.token_type),
            expires_in: Some(bundle.expires_in),
            session_id: Some(bundle.session_id),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MfaChallengeRequest {
    #[validate(length(min = 1, message = "MFA token is required"))]
    pub mfa_token: String,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    #[schema(example = "123456")]
    pub code: String,

    pub device_info: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MfaCodeRequest {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@acme.example")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendVerificationRequest {
    pub user_id: Uuid,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TokenRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

/// Public view of a user. Never carries the password hash or MFA secret.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub name: String,
    pub role_id: Uuid,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    #[schema(example = "active")]
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            organization_id: user.organization_id,
            email: user.email,
            name: user.name,
            role_id: user.role_id,
            email_verified: user.email_verified,
            mfa_enabled: user.mfa_enabled,
            status: user.status,
            created_utc: user.created_utc,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    #[schema(example = "admin")]
    pub role: Option<String>,
    pub permissions: Vec<Permission>,
}

impl MeResponse {
    pub fn new(user: User, role: Option<Role>) -> Self {
        let (role, permissions) = match role {
            Some(role) => (Some(role.name), role.permissions.into_iter().collect()),
            None => (None, Vec::new()),
        };
        Self {
            user: user.into(),
            role,
            permissions,
        }
    }
}
