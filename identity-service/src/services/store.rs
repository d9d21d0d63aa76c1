//! Credential store abstraction.
//!
//! Every method that guards an at-most-once transition (token redemption,
//! refresh rotation, invite acceptance, MFA enable, role deletion) must be
//! atomic in the implementation: the loser of a race observes the consumed
//! state and gets an error or `false`, never a second success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ApiKey, Invitation, OneTimeToken, Organization, RefreshToken, Role, Session, TokenEffect,
    User, UserStatus,
};
use crate::services::ServiceError;

/// Result of a conditional role delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDeletion {
    Deleted,
    InUse(u64),
    /// No user holds the role but pending invitations still grant it
    Invited(u64),
    NotFound,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn ping(&self) -> Result<(), ServiceError>;

    // ==================== Organizations ====================

    /// Creates the organization, its seeded roles and its first admin together.
    /// Fails with `Conflict` if the organization name or admin email is taken.
    async fn create_organization(
        &self,
        organization: &Organization,
        roles: &[Role],
        admin: &User,
    ) -> Result<(), ServiceError>;

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, ServiceError>;

    // ==================== Users ====================

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, ServiceError>;

    /// Lookup by normalized (lowercase) email.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;

    /// Stores a fresh TOTP secret and clears both MFA flags.
    async fn set_mfa_secret(&self, user_id: Uuid, secret: &str) -> Result<(), ServiceError>;

    async fn mark_mfa_verified(&self, user_id: Uuid) -> Result<(), ServiceError>;

    /// Sets `mfa_enabled` only if a secret exists, it was verified and MFA is
    /// not already on. Returns whether this call made the transition.
    async fn enable_mfa(&self, user_id: Uuid) -> Result<bool, ServiceError>;

    /// Removes the secret and clears both flags.
    async fn clear_mfa(&self, user_id: Uuid) -> Result<(), ServiceError>;

    async fn set_user_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ServiceError>;

    async fn set_user_status(&self, user_id: Uuid, status: UserStatus)
        -> Result<(), ServiceError>;

    // ==================== One-time tokens ====================

    async fn insert_one_time_token(&self, token: &OneTimeToken) -> Result<(), ServiceError>;

    /// Marks the token used and applies `effect` in one atomic step.
    ///
    /// Returns the owning user id. Fails with `InvalidToken` when no token of
    /// the effect's purpose has this hash, `AlreadyUsed` when it was consumed,
    /// and `TokenExpired` when `now` is past its expiry.
    async fn redeem_one_time_token(
        &self,
        token_hash: &str,
        effect: TokenEffect,
        now: DateTime<Utc>,
    ) -> Result<Uuid, ServiceError>;

    // ==================== Sessions ====================

    async fn insert_session(&self, session: &Session) -> Result<(), ServiceError>;

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError>;

    async fn list_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, ServiceError>;

    async fn list_sessions_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<Session>, ServiceError>;

    /// Revokes the session and its refresh tokens. Revoking a revoked session
    /// is a no-op.
    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError>;

    /// Revokes every active session of the user except `keep`. Returns the count.
    async fn revoke_other_sessions(
        &self,
        user_id: Uuid,
        keep: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    /// Revokes every active session and refresh token of the user.
    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    // ==================== Refresh tokens ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError>;

    /// Consumes refresh token `jti` and records `replacement` in its place.
    ///
    /// Succeeds only if `jti` is unrevoked, unexpired and its session is still
    /// active. Returns whether the rotation happened.
    async fn rotate_refresh_token(
        &self,
        jti: Uuid,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    // ==================== Invitations ====================

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError>;

    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>, ServiceError>;

    async fn find_invitation_by_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, ServiceError>;

    /// Pending invites whose expiry is still ahead of `now`.
    async fn list_pending_invitations(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, ServiceError>;

    /// Moves the invite from pending to accepted and inserts `user` atomically.
    ///
    /// Fails with `AlreadyUsed`, `InvalidToken` (revoked or missing),
    /// `TokenExpired`, or `Conflict` (email taken). Any failure leaves both
    /// the invite and the user table untouched.
    async fn accept_invitation(
        &self,
        invitation_id: Uuid,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<Invitation, ServiceError>;

    /// Pending to revoked. Returns whether this call made the transition.
    async fn revoke_invitation(&self, id: Uuid) -> Result<bool, ServiceError>;

    // ==================== Roles ====================

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError>;

    async fn find_role(&self, id: Uuid) -> Result<Option<Role>, ServiceError>;

    async fn find_role_by_name(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, ServiceError>;

    async fn list_roles(&self, organization_id: Uuid) -> Result<Vec<Role>, ServiceError>;

    /// Persists name, description and permissions. `Conflict` on a duplicate name.
    async fn update_role(&self, role: &Role) -> Result<(), ServiceError>;

    /// Deletes the role only if no user and no pending invitation references it.
    /// Settled invitations for the role keep their row with the role cleared.
    async fn delete_role_if_unassigned(&self, id: Uuid) -> Result<RoleDeletion, ServiceError>;

    // ==================== API keys ====================

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), ServiceError>;

    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, ServiceError>;

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, ServiceError>;

    async fn list_api_keys(&self, organization_id: Uuid) -> Result<Vec<ApiKey>, ServiceError>;

    /// Idempotent.
    async fn revoke_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError>;

    async fn touch_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError>;
}
