//! PostgreSQL credential store.
//!
//! At-most-once transitions are conditional `UPDATE ... WHERE <state>` statements
//! or transactions that lock the row first, so a losing concurrent request sees
//! the consumed state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::{
    ApiKey, ApiKeyStatus, Invitation, InvitationStatus, OneTimeToken, Organization, Permission,
    RefreshToken, Role, Session, SessionStatus, TokenEffect, User, UserStatus,
};
use crate::services::store::{CredentialStore, RoleDeletion};
use crate::services::ServiceError;

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps a unique-constraint violation to `Conflict`, anything else to `Database`.
fn conflict_on_unique(err: sqlx::Error, message: &str) -> ServiceError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            ServiceError::Conflict(message.to_string())
        }
        _ => ServiceError::from(err),
    }
}

#[derive(FromRow)]
struct RoleRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    permissions: Vec<String>,
    is_system: bool,
    created_utc: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            description: row.description,
            permissions: Permission::parse_set(&row.permissions),
            is_system: row.is_system,
            created_utc: row.created_utc,
        }
    }
}

#[derive(FromRow)]
struct ApiKeyRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    key_prefix: String,
    key_hash: String,
    permissions: Vec<String>,
    created_by: Uuid,
    created_utc: DateTime<Utc>,
    last_used_utc: Option<DateTime<Utc>>,
    status: String,
    revoked_utc: Option<DateTime<Utc>>,
}

impl From<ApiKeyRow> for ApiKey {
    fn from(row: ApiKeyRow) -> Self {
        ApiKey {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            key_prefix: row.key_prefix,
            key_hash: row.key_hash,
            permissions: Permission::parse_set(&row.permissions),
            created_by: row.created_by,
            created_utc: row.created_utc,
            last_used_utc: row.last_used_utc,
            status: row.status,
            revoked_utc: row.revoked_utc,
        }
    }
}

const INSERT_ROLE: &str = "INSERT INTO roles (id, organization_id, name, description, permissions, is_system, created_utc)
     VALUES ($1, $2, $3, $4, $5, $6, $7)";

const INSERT_USER: &str = "INSERT INTO users (id, organization_id, email, name, password_hash, role_id, email_verified,
         mfa_enabled, mfa_verified, mfa_secret, status, created_utc)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)";

fn bind_user<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    user: &'q User,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(user.id)
        .bind(user.organization_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role_id)
        .bind(user.email_verified)
        .bind(user.mfa_enabled)
        .bind(user.mfa_verified)
        .bind(&user.mfa_secret)
        .bind(&user.status)
        .bind(user.created_utc)
}

#[async_trait]
impl CredentialStore for Database {
    async fn ping(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::from(e)
        })?;
        Ok(())
    }

    // ==================== Organizations ====================

    async fn create_organization(
        &self,
        organization: &Organization,
        roles: &[Role],
        admin: &User,
    ) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO organizations (id, name, plan, status, created_utc) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(organization.id)
        .bind(&organization.name)
        .bind(&organization.plan)
        .bind(&organization.status)
        .bind(organization.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "Organization name already registered"))?;

        for role in roles {
            sqlx::query(INSERT_ROLE)
                .bind(role.id)
                .bind(role.organization_id)
                .bind(&role.name)
                .bind(&role.description)
                .bind(Permission::to_strings(&role.permissions))
                .bind(role.is_system)
                .bind(role.created_utc)
                .execute(&mut *tx)
                .await?;
        }

        bind_user(sqlx::query(INSERT_USER), admin)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, "Email already registered"))?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    // ==================== Users ====================

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn set_mfa_secret(&self, user_id: Uuid, secret: &str) -> Result<(), ServiceError> {
        let result = sqlx::query(
            "UPDATE users SET mfa_secret = $2, mfa_enabled = FALSE, mfa_verified = FALSE WHERE id = $1",
        )
        .bind(user_id)
        .bind(secret)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    async fn mark_mfa_verified(&self, user_id: Uuid) -> Result<(), ServiceError> {
        sqlx::query("UPDATE users SET mfa_verified = TRUE WHERE id = $1 AND mfa_secret IS NOT NULL")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn enable_mfa(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            "UPDATE users SET mfa_enabled = TRUE
             WHERE id = $1 AND mfa_verified AND mfa_secret IS NOT NULL AND NOT mfa_enabled",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_mfa(&self, user_id: Uuid) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE users SET mfa_secret = NULL, mfa_enabled = FALSE, mfa_verified = FALSE WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_user_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ServiceError> {
        let result = sqlx::query("UPDATE users SET role_id = $2 WHERE id = $1")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                    ServiceError::NotFound("Role not found".to_string())
                }
                _ => ServiceError::from(e),
            })?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    async fn set_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<(), ServiceError> {
        let result = sqlx::query("UPDATE users SET status = $2 WHERE id = $1")
            .bind(user_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("User not found".to_string()));
        }
        Ok(())
    }

    // ==================== One-time tokens ====================

    async fn insert_one_time_token(&self, token: &OneTimeToken) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO one_time_tokens (id, user_id, purpose, token_hash, expires_utc, used_utc, created_utc)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.purpose)
        .bind(&token.token_hash)
        .bind(token.expires_utc)
        .bind(token.used_utc)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn redeem_one_time_token(
        &self,
        token_hash: &str,
        effect: TokenEffect,
        now: DateTime<Utc>,
    ) -> Result<Uuid, ServiceError> {
        let purpose = effect.purpose();
        let mut tx = self.pool.begin().await?;

        let consumed: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE one_time_tokens SET used_utc = $3
             WHERE token_hash = $1 AND purpose = $2 AND used_utc IS NULL AND expires_utc > $3
             RETURNING user_id",
        )
        .bind(token_hash)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id,)) = consumed else {
            tx.rollback().await?;
            let existing = sqlx::query_as::<_, OneTimeToken>(
                "SELECT * FROM one_time_tokens WHERE token_hash = $1 AND purpose = $2",
            )
            .bind(token_hash)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .await?;
            return Err(match existing {
                None => ServiceError::InvalidToken,
                Some(t) if t.used_utc.is_some() => ServiceError::AlreadyUsed,
                Some(_) => ServiceError::TokenExpired,
            });
        };

        match effect {
            TokenEffect::SetPassword { password_hash } => {
                sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
                    .bind(user_id)
                    .bind(password_hash)
                    .execute(&mut *tx)
                    .await?;
            }
            TokenEffect::VerifyEmail => {
                sqlx::query("UPDATE users SET email_verified = TRUE WHERE id = $1")
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(user_id)
    }

    // ==================== Sessions ====================

    async fn insert_session(&self, session: &Session) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, organization_id, device_info, ip_address, login_utc, status, revoked_utc)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.organization_id)
        .bind(&session.device_info)
        .bind(&session.ip_address)
        .bind(session.login_utc)
        .bind(&session.status)
        .bind(session.revoked_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError> {
        Ok(sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, ServiceError> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 ORDER BY login_utc DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_sessions_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<Session>, ServiceError> {
        Ok(sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE organization_id = $1 ORDER BY login_utc DESC",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE sessions SET status = $2, revoked_utc = $3 WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .bind(SessionStatus::Revoked.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_utc = $2 WHERE session_id = $1 AND revoked_utc IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn revoke_other_sessions(
        &self,
        user_id: Uuid,
        keep: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let revoked: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE sessions SET status = $3, revoked_utc = $4
             WHERE user_id = $1 AND id <> $2 AND status = 'active'
             RETURNING id",
        )
        .bind(user_id)
        .bind(keep)
        .bind(SessionStatus::Revoked.as_str())
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        let ids: Vec<Uuid> = revoked.into_iter().map(|(id,)| id).collect();
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_utc = $2 WHERE session_id = ANY($1) AND revoked_utc IS NULL",
        )
        .bind(&ids)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ids.len() as u64)
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE sessions SET status = $2, revoked_utc = $3 WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .bind(SessionStatus::Revoked.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE refresh_tokens SET revoked_utc = $2 WHERE user_id = $1 AND revoked_utc IS NULL",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    // ==================== Refresh tokens ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, session_id, expires_utc, revoked_utc, created_utc)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(token.jti)
        .bind(token.user_id)
        .bind(token.session_id)
        .bind(token.expires_utc)
        .bind(token.revoked_utc)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        jti: Uuid,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(
            "UPDATE refresh_tokens rt SET revoked_utc = $2
             WHERE rt.jti = $1 AND rt.revoked_utc IS NULL AND rt.expires_utc > $2
               AND EXISTS (SELECT 1 FROM sessions s WHERE s.id = rt.session_id AND s.status = 'active')",
        )
        .bind(jti)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (jti, user_id, session_id, expires_utc, revoked_utc, created_utc)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(replacement.jti)
        .bind(replacement.user_id)
        .bind(replacement.session_id)
        .bind(replacement.expires_utc)
        .bind(replacement.revoked_utc)
        .bind(replacement.created_utc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    // ==================== Invitations ====================

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO invitations (id, organization_id, email, role_id, token_hash, invited_by,
                 sent_utc, expires_utc, status, accepted_utc, accepted_user_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(invitation.id)
        .bind(invitation.organization_id)
        .bind(&invitation.email)
        .bind(invitation.role_id)
        .bind(&invitation.token_hash)
        .bind(invitation.invited_by)
        .bind(invitation.sent_utc)
        .bind(invitation.expires_utc)
        .bind(&invitation.status)
        .bind(invitation.accepted_utc)
        .bind(invitation.accepted_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_invitation_by_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_pending_invitations(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, ServiceError> {
        Ok(sqlx::query_as::<_, Invitation>(
            "SELECT * FROM invitations
             WHERE organization_id = $1 AND status = 'pending' AND expires_utc > $2
             ORDER BY sent_utc DESC",
        )
        .bind(organization_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn accept_invitation(
        &self,
        invitation_id: Uuid,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<Invitation, ServiceError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent acceptances of the same invite
        let invitation =
            sqlx::query_as::<_, Invitation>("SELECT * FROM invitations WHERE id = $1 FOR UPDATE")
                .bind(invitation_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(ServiceError::InvalidToken)?;

        match invitation.effective_status(now) {
            InvitationStatus::Pending => {}
            InvitationStatus::Accepted => return Err(ServiceError::AlreadyUsed),
            InvitationStatus::Revoked => return Err(ServiceError::InvalidToken),
            InvitationStatus::Expired => return Err(ServiceError::TokenExpired),
        }

        bind_user(sqlx::query(INSERT_USER), user)
            .execute(&mut *tx)
            .await
            .map_err(|e| conflict_on_unique(e, "A user with this email already exists"))?;

        let accepted = sqlx::query_as::<_, Invitation>(
            "UPDATE invitations SET status = $2, accepted_utc = $3, accepted_user_id = $4
             WHERE id = $1 AND status = 'pending'
             RETURNING *",
        )
        .bind(invitation_id)
        .bind(InvitationStatus::Accepted.as_str())
        .bind(now)
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(accepted)
    }

    async fn revoke_invitation(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result =
            sqlx::query("UPDATE invitations SET status = $2 WHERE id = $1 AND status = 'pending'")
                .bind(id)
                .bind(InvitationStatus::Revoked.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Roles ====================

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError> {
        sqlx::query(INSERT_ROLE)
            .bind(role.id)
            .bind(role.organization_id)
            .bind(&role.name)
            .bind(&role.description)
            .bind(Permission::to_strings(&role.permissions))
            .bind(role.is_system)
            .bind(role.created_utc)
            .execute(&self.pool)
            .await
            .map_err(|e| conflict_on_unique(e, &format!("Role '{}' already exists", role.name)))?;
        Ok(())
    }

    async fn find_role(&self, id: Uuid) -> Result<Option<Role>, ServiceError> {
        let row = sqlx::query_as::<_, RoleRow>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Role::from))
    }

    async fn find_role_by_name(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, ServiceError> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT * FROM roles WHERE organization_id = $1 AND name = $2",
        )
        .bind(organization_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Role::from))
    }

    async fn list_roles(&self, organization_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let rows = sqlx::query_as::<_, RoleRow>(
            "SELECT * FROM roles WHERE organization_id = $1 ORDER BY name",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn update_role(&self, role: &Role) -> Result<(), ServiceError> {
        let result = sqlx::query(
            "UPDATE roles SET name = $2, description = $3, permissions = $4 WHERE id = $1",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(Permission::to_strings(&role.permissions))
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, &format!("Role '{}' already exists", role.name)))?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("Role not found".to_string()));
        }
        Ok(())
    }

    async fn delete_role_if_unassigned(&self, id: Uuid) -> Result<RoleDeletion, ServiceError> {
        let deleted = sqlx::query(
            "DELETE FROM roles WHERE id = $1
                 AND NOT EXISTS (SELECT 1 FROM users WHERE role_id = $1)
                 AND NOT EXISTS (SELECT 1 FROM invitations WHERE role_id = $1 AND status = 'pending')",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            // A user was assigned between the check and the delete
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                ServiceError::Conflict("Role is assigned to users".to_string())
            }
            _ => ServiceError::from(e),
        })?;

        if deleted.rows_affected() == 1 {
            return Ok(RoleDeletion::Deleted);
        }

        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Ok(RoleDeletion::NotFound);
        }
        let (assigned,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if assigned > 0 {
            return Ok(RoleDeletion::InUse(assigned as u64));
        }
        let (invited,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM invitations WHERE role_id = $1 AND status = 'pending'",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        if invited > 0 {
            return Ok(RoleDeletion::Invited(invited as u64));
        }
        // Both references cleared between the delete and the counts
        Ok(RoleDeletion::InUse(1))
    }

    // ==================== API keys ====================

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), ServiceError> {
        sqlx::query(
            "INSERT INTO api_keys (id, organization_id, name, key_prefix, key_hash, permissions,
                 created_by, created_utc, last_used_utc, status, revoked_utc)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(key.id)
        .bind(key.organization_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(Permission::to_strings(&key.permissions))
        .bind(key.created_by)
        .bind(key.created_utc)
        .bind(key.last_used_utc)
        .bind(&key.status)
        .bind(key.revoked_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, ServiceError> {
        let row = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ApiKey::from))
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, ServiceError> {
        let row = sqlx::query_as::<_, ApiKeyRow>("SELECT * FROM api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ApiKey::from))
    }

    async fn list_api_keys(&self, organization_id: Uuid) -> Result<Vec<ApiKey>, ServiceError> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT * FROM api_keys WHERE organization_id = $1 ORDER BY created_utc DESC",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    async fn revoke_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError> {
        sqlx::query(
            "UPDATE api_keys SET status = $2, revoked_utc = $3 WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .bind(ApiKeyStatus::Revoked.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError> {
        sqlx::query("UPDATE api_keys SET last_used_utc = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
