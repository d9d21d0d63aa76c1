//! In-memory credential store.
//!
//! One `tokio::sync::Mutex` guards all tables, so every trait method runs as a
//! single critical section and the conditional transitions are atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::models::{
    ApiKey, ApiKeyStatus, Invitation, InvitationStatus, OneTimeToken, Organization, RefreshToken,
    Role, Session, SessionStatus, TokenEffect, User, UserStatus,
};
use crate::services::store::{CredentialStore, RoleDeletion};
use crate::services::ServiceError;

#[derive(Default)]
struct Tables {
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
    roles: HashMap<Uuid, Role>,
    sessions: HashMap<Uuid, Session>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
    one_time_tokens: HashMap<String, OneTimeToken>,
    invitations: HashMap<Uuid, Invitation>,
    api_keys: HashMap<Uuid, ApiKey>,
}

impl Tables {
    fn email_taken(&self, email: &str) -> bool {
        self.users.values().any(|u| u.email == email)
    }

    fn user_mut(&mut self, id: Uuid) -> Result<&mut User, ServiceError> {
        self.users
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }

    fn role_name_taken(&self, organization_id: Uuid, name: &str, except: Option<Uuid>) -> bool {
        self.roles.values().any(|r| {
            r.organization_id == organization_id && r.name == name && Some(r.id) != except
        })
    }

    fn revoke_session(&mut self, id: Uuid, now: DateTime<Utc>) {
        if let Some(session) = self.sessions.get_mut(&id) {
            if session.is_active() {
                session.status = SessionStatus::Revoked.as_str().to_string();
                session.revoked_utc = Some(now);
            }
        }
        for token in self.refresh_tokens.values_mut() {
            if token.session_id == id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(now);
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every store call fails with `ServiceError::Database`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    async fn tables(&self) -> Result<MutexGuard<'_, Tables>, ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Database(anyhow::anyhow!(
                "in-memory store is unavailable"
            )));
        }
        Ok(self.tables.lock().await)
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn ping(&self) -> Result<(), ServiceError> {
        self.tables().await.map(|_| ())
    }

    // ==================== Organizations ====================

    async fn create_organization(
        &self,
        organization: &Organization,
        roles: &[Role],
        admin: &User,
    ) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        let name = organization.name.to_lowercase();
        if t.organizations
            .values()
            .any(|o| o.name.to_lowercase() == name)
        {
            return Err(ServiceError::Conflict(
                "Organization name already registered".to_string(),
            ));
        }
        if t.email_taken(&admin.email) {
            return Err(ServiceError::Conflict("Email already registered".to_string()));
        }

        t.organizations
            .insert(organization.id, organization.clone());
        for role in roles {
            t.roles.insert(role.id, role.clone());
        }
        t.users.insert(admin.id, admin.clone());
        Ok(())
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, ServiceError> {
        Ok(self.tables().await?.organizations.get(&id).cloned())
    }

    // ==================== Users ====================

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.tables().await?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let t = self.tables().await?;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn set_mfa_secret(&self, user_id: Uuid, secret: &str) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        let user = t.user_mut(user_id)?;
        user.mfa_secret = Some(secret.to_string());
        user.mfa_enabled = false;
        user.mfa_verified = false;
        Ok(())
    }

    async fn mark_mfa_verified(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        let user = t.user_mut(user_id)?;
        if user.mfa_secret.is_some() {
            user.mfa_verified = true;
        }
        Ok(())
    }

    async fn enable_mfa(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        let mut t = self.tables().await?;
        let user = t.user_mut(user_id)?;
        if user.mfa_secret.is_some() && user.mfa_verified && !user.mfa_enabled {
            user.mfa_enabled = true;
            return Ok(true);
        }
        Ok(false)
    }

    async fn clear_mfa(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        let user = t.user_mut(user_id)?;
        user.mfa_secret = None;
        user.mfa_enabled = false;
        user.mfa_verified = false;
        Ok(())
    }

    async fn set_user_role(&self, user_id: Uuid, role_id: Uuid) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        if !t.roles.contains_key(&role_id) {
            return Err(ServiceError::NotFound("Role not found".to_string()));
        }
        t.user_mut(user_id)?.role_id = role_id;
        Ok(())
    }

    async fn set_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        t.user_mut(user_id)?.status = status.as_str().to_string();
        Ok(())
    }

    // ==================== One-time tokens ====================

    async fn insert_one_time_token(&self, token: &OneTimeToken) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        t.one_time_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn redeem_one_time_token(
        &self,
        token_hash: &str,
        effect: TokenEffect,
        now: DateTime<Utc>,
    ) -> Result<Uuid, ServiceError> {
        let mut t = self.tables().await?;
        let purpose = effect.purpose();

        let token = match t.one_time_tokens.get(token_hash) {
            Some(token) if token.purpose == purpose.as_str() => token.clone(),
            _ => return Err(ServiceError::InvalidToken),
        };
        if token.used_utc.is_some() {
            return Err(ServiceError::AlreadyUsed);
        }
        if token.is_expired(now) {
            return Err(ServiceError::TokenExpired);
        }

        let user = t.user_mut(token.user_id)?;
        match effect {
            TokenEffect::SetPassword { password_hash } => user.password_hash = password_hash,
            TokenEffect::VerifyEmail => user.email_verified = true,
        }
        if let Some(stored) = t.one_time_tokens.get_mut(token_hash) {
            stored.used_utc = Some(now);
        }
        Ok(token.user_id)
    }

    // ==================== Sessions ====================

    async fn insert_session(&self, session: &Session) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        t.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, ServiceError> {
        Ok(self.tables().await?.sessions.get(&id).cloned())
    }

    async fn list_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, ServiceError> {
        let t = self.tables().await?;
        let mut sessions: Vec<Session> = t
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.login_utc.cmp(&a.login_utc));
        Ok(sessions)
    }

    async fn list_sessions_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<Session>, ServiceError> {
        let t = self.tables().await?;
        let mut sessions: Vec<Session> = t
            .sessions
            .values()
            .filter(|s| s.organization_id == organization_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.login_utc.cmp(&a.login_utc));
        Ok(sessions)
    }

    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError> {
        self.tables().await?.revoke_session(id, now);
        Ok(())
    }

    async fn revoke_other_sessions(
        &self,
        user_id: Uuid,
        keep: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut t = self.tables().await?;
        let targets: Vec<Uuid> = t
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.id != keep && s.is_active())
            .map(|s| s.id)
            .collect();
        for id in &targets {
            t.revoke_session(*id, now);
        }
        Ok(targets.len() as u64)
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut t = self.tables().await?;
        let targets: Vec<Uuid> = t
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_active())
            .map(|s| s.id)
            .collect();
        for id in &targets {
            t.revoke_session(*id, now);
        }
        for token in t.refresh_tokens.values_mut() {
            if token.user_id == user_id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(now);
            }
        }
        Ok(targets.len() as u64)
    }

    // ==================== Refresh tokens ====================

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        t.refresh_tokens.insert(token.jti, token.clone());
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        jti: Uuid,
        replacement: &RefreshToken,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let mut t = self.tables().await?;

        let session_id = match t.refresh_tokens.get(&jti) {
            Some(token) if token.is_usable(now) => token.session_id,
            _ => return Ok(false),
        };
        let session_active = t
            .sessions
            .get(&session_id)
            .map(|s| s.is_active())
            .unwrap_or(false);
        if !session_active {
            return Ok(false);
        }

        if let Some(token) = t.refresh_tokens.get_mut(&jti) {
            token.revoked_utc = Some(now);
        }
        t.refresh_tokens
            .insert(replacement.jti, replacement.clone());
        Ok(true)
    }

    // ==================== Invitations ====================

    async fn insert_invitation(&self, invitation: &Invitation) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        t.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn find_invitation(&self, id: Uuid) -> Result<Option<Invitation>, ServiceError> {
        Ok(self.tables().await?.invitations.get(&id).cloned())
    }

    async fn find_invitation_by_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Invitation>, ServiceError> {
        let t = self.tables().await?;
        Ok(t.invitations
            .values()
            .find(|i| i.token_hash == token_hash)
            .cloned())
    }

    async fn list_pending_invitations(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, ServiceError> {
        let t = self.tables().await?;
        let mut invites: Vec<Invitation> = t
            .invitations
            .values()
            .filter(|i| {
                i.organization_id == organization_id
                    && i.effective_status(now) == InvitationStatus::Pending
            })
            .cloned()
            .collect();
        invites.sort_by(|a, b| b.sent_utc.cmp(&a.sent_utc));
        Ok(invites)
    }

    async fn accept_invitation(
        &self,
        invitation_id: Uuid,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<Invitation, ServiceError> {
        let mut t = self.tables().await?;

        let invitation = t
            .invitations
            .get(&invitation_id)
            .cloned()
            .ok_or(ServiceError::InvalidToken)?;
        match invitation.effective_status(now) {
            InvitationStatus::Pending => {}
            InvitationStatus::Accepted => return Err(ServiceError::AlreadyUsed),
            InvitationStatus::Revoked => return Err(ServiceError::InvalidToken),
            InvitationStatus::Expired => return Err(ServiceError::TokenExpired),
        }
        if t.email_taken(&user.email) {
            return Err(ServiceError::Conflict(
                "A user with this email already exists".to_string(),
            ));
        }

        t.users.insert(user.id, user.clone());
        let stored = t
            .invitations
            .get_mut(&invitation_id)
            .ok_or(ServiceError::InvalidToken)?;
        stored.status = InvitationStatus::Accepted.as_str().to_string();
        stored.accepted_utc = Some(now);
        stored.accepted_user_id = Some(user.id);
        Ok(stored.clone())
    }

    async fn revoke_invitation(&self, id: Uuid) -> Result<bool, ServiceError> {
        let mut t = self.tables().await?;
        match t.invitations.get_mut(&id) {
            Some(inv) if inv.status == InvitationStatus::Pending.as_str() => {
                inv.status = InvitationStatus::Revoked.as_str().to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ==================== Roles ====================

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        if t.role_name_taken(role.organization_id, &role.name, None) {
            return Err(ServiceError::Conflict(format!(
                "Role '{}' already exists",
                role.name
            )));
        }
        t.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn find_role(&self, id: Uuid) -> Result<Option<Role>, ServiceError> {
        Ok(self.tables().await?.roles.get(&id).cloned())
    }

    async fn find_role_by_name(
        &self,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Option<Role>, ServiceError> {
        let t = self.tables().await?;
        Ok(t.roles
            .values()
            .find(|r| r.organization_id == organization_id && r.name == name)
            .cloned())
    }

    async fn list_roles(&self, organization_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let t = self.tables().await?;
        let mut roles: Vec<Role> = t
            .roles
            .values()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn update_role(&self, role: &Role) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        if t.role_name_taken(role.organization_id, &role.name, Some(role.id)) {
            return Err(ServiceError::Conflict(format!(
                "Role '{}' already exists",
                role.name
            )));
        }
        match t.roles.get_mut(&role.id) {
            Some(stored) => {
                stored.name = role.name.clone();
                stored.description = role.description.clone();
                stored.permissions = role.permissions.clone();
                Ok(())
            }
            None => Err(ServiceError::NotFound("Role not found".to_string())),
        }
    }

    async fn delete_role_if_unassigned(&self, id: Uuid) -> Result<RoleDeletion, ServiceError> {
        let mut t = self.tables().await?;
        if !t.roles.contains_key(&id) {
            return Ok(RoleDeletion::NotFound);
        }
        let assigned = t.users.values().filter(|u| u.role_id == id).count() as u64;
        if assigned > 0 {
            return Ok(RoleDeletion::InUse(assigned));
        }
        let invited = t
            .invitations
            .values()
            .filter(|inv| {
                inv.role_id == Some(id) && inv.status == InvitationStatus::Pending.as_str()
            })
            .count() as u64;
        if invited > 0 {
            return Ok(RoleDeletion::Invited(invited));
        }
        t.roles.remove(&id);
        for inv in t.invitations.values_mut().filter(|inv| inv.role_id == Some(id)) {
            inv.role_id = None;
        }
        Ok(RoleDeletion::Deleted)
    }

    // ==================== API keys ====================

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        t.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn find_api_key(&self, id: Uuid) -> Result<Option<ApiKey>, ServiceError> {
        Ok(self.tables().await?.api_keys.get(&id).cloned())
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, ServiceError> {
        let t = self.tables().await?;
        Ok(t.api_keys
            .values()
            .find(|k| k.key_hash == key_hash)
            .cloned())
    }

    async fn list_api_keys(&self, organization_id: Uuid) -> Result<Vec<ApiKey>, ServiceError> {
        let t = self.tables().await?;
        let mut keys: Vec<ApiKey> = t
            .api_keys
            .values()
            .filter(|k| k.organization_id == organization_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(keys)
    }

    async fn revoke_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        if let Some(key) = t.api_keys.get_mut(&id) {
            if key.is_active() {
                key.status = ApiKeyStatus::Revoked.as_str().to_string();
                key.revoked_utc = Some(now);
            }
        }
        Ok(())
    }

    async fn touch_api_key(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), ServiceError> {
        let mut t = self.tables().await?;
        if let Some(key) = t.api_keys.get_mut(&id) {
            key.last_used_utc = Some(now);
        }
        Ok(())
    }
}
