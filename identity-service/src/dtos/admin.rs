use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{ApiKey, Invitation, Permission, Role, Session, UserStatus};
use crate::dtos::auth::UserResponse;
use crate::services::{CreatedApiKey, CreatedInvitation, Delivery, TokenBundle};

// ==================== Invitations ====================

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateInviteRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "new.hire@acme.example")]
    pub email: String,
    pub role_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InviteResponse {
    pub id: Uuid,
    pub email: String,
    pub role_id: Option<Uuid>,
    pub invited_by: Uuid,
    #[schema(example = "pending")]
    pub status: String,
    pub sent_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
}

impl From<Invitation> for InviteResponse {
    fn from(invite: Invitation) -> Self {
        Self {
            id: invite.id,
            email: invite.email,
            role_id: invite.role_id,
            invited_by: invite.invited_by,
            status: invite.status,
            sent_utc: invite.sent_utc,
            expires_utc: invite.expires_utc,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateInviteResponse {
    pub invitation: InviteResponse,
    pub delivery: Delivery,
}

impl From<CreatedInvitation> for CreateInviteResponse {
    fn from(created: CreatedInvitation) -> Self {
        Self {
            invitation: created.invitation.into(),
            delivery: created.delivery,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AcceptInviteRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    #[schema(example = "Bob Builder")]
    pub name: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[schema(example = "Firefox on macOS")]
    pub device_info: Option<String>,
}

/// The new account and the tokens of its first session.
#[derive(Debug, Serialize, ToSchema)]
pub struct AcceptInviteResponse {
    pub user: UserResponse,
    pub tokens: TokenBundle,
}

// ==================== Sessions ====================

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub login_utc: DateTime<Utc>,
    #[schema(example = "active")]
    pub status: String,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            device_info: session.device_info,
            ip_address: session.ip_address,
            login_utc: session.login_utc,
            status: session.status,
            revoked_utc: session.revoked_utc,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokeOthersResponse {
    pub revoked: u64,
}

// ==================== Roles & users ====================

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role name is required"))]
    #[schema(example = "collector")]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "Role name cannot be empty"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<Permission>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub is_system: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            description: role.description,
            permissions: role.permissions.into_iter().collect(),
            is_system: role.is_system,
            created_utc: role.created_utc,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetUserStatusRequest {
    pub status: UserStatus,
}

// ==================== API keys ====================

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 100, message = "Key name is required"))]
    #[schema(example = "billing-sync")]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    #[schema(example = "idk_3f9a1c2b")]
    pub key_prefix: String,
    pub permissions: Vec<Permission>,
    pub created_by: Uuid,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: Option<DateTime<Utc>>,
    #[schema(example = "active")]
    pub status: String,
}

impl From<ApiKey> for ApiKeyResponse {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            key_prefix: key.key_prefix,
            permissions: key.permissions.into_iter().collect(),
            created_by: key.created_by,
            created_utc: key.created_utc,
            last_used_utc: key.last_used_utc,
            status: key.status,
        }
    }
}

/// `api_key` is shown exactly once.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateApiKeyResponse {
    pub api_key: String,
    pub key: ApiKeyResponse,
}

impl From<CreatedApiKey> for CreateApiKeyResponse {
    fn from(created: CreatedApiKey) -> Self {
        Self {
            api_key: created.material,
            key: created.key.into(),
        }
    }
}
