//! Session registry.
//!
//! A session is a record of a sign-in, not a capability: revoking one stops its
//! refresh token but leaves already-issued access tokens valid until they expire.

use std::sync::Arc;
use uuid::Uuid;

use crate::models::{Permission, Session};
use crate::services::rbac::{ensure_same_tenant, Principal, RbacService};
use crate::services::{Clock, CredentialStore, ServiceError};

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    rbac: RbacService,
}

impl SessionService {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, rbac: RbacService) -> Self {
        Self { store, clock, rbac }
    }

    pub async fn create_session(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        device_info: Option<String>,
        ip_address: Option<String>,
    ) -> Result<Session, ServiceError> {
        let session = Session::new(
            user_id,
            organization_id,
            device_info,
            ip_address,
            self.clock.now(),
        );
        self.store.insert_session(&session).await?;
        tracing::info!(user_id = %user_id, session_id = %session.id, "Session created");
        Ok(session)
    }

    /// The caller's own sessions, newest first.
    pub async fn list_sessions(&self, principal: &Principal) -> Result<Vec<Session>, ServiceError> {
        principal.require_user()?;
        self.store.list_sessions_for_user(principal.user_id).await
    }

    pub async fn list_org_sessions(
        &self,
        principal: &Principal,
    ) -> Result<Vec<Session>, ServiceError> {
        self.rbac
            .require(principal, Permission::SessionsManage)
            .await?;
        self.store
            .list_sessions_for_organization(principal.organization_id)
            .await
    }

    /// Allowed for the session's owner and for holders of `sessions:manage` in
    /// the same organization. Revoking an already revoked session succeeds.
    #[tracing::instrument(skip(self, principal), fields(user_id = %principal.user_id))]
    pub async fn revoke(&self, principal: &Principal, session_id: Uuid) -> Result<Session, ServiceError> {
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Session not found".to_string()))?;
        ensure_same_tenant(principal, session.organization_id)?;

        let is_owner = !principal.is_api_key() && session.user_id == principal.user_id;
        if !is_owner {
            match self.rbac.require(principal, Permission::SessionsManage).await {
                Ok(()) => {}
                Err(ServiceError::Forbidden(_)) => {
                    return Err(ServiceError::Forbidden(
                        "Cannot revoke another user's session".to_string(),
                    ))
                }
                Err(e) => return Err(e),
            }
        }

        self.store.revoke_session(session_id, self.clock.now()).await?;
        tracing::info!(session_id = %session_id, "Session revoked");

        self.store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Session not found".to_string()))
    }

    /// "Log out other devices": revokes every active session of the caller
    /// except the one the request came from.
    pub async fn revoke_all_except(&self, principal: &Principal) -> Result<u64, ServiceError> {
        principal.require_user()?;
        let current = principal.session_id.ok_or_else(|| {
            ServiceError::Validation("Request is not bound to a session".to_string())
        })?;

        let revoked = self
            .store
            .revoke_other_sessions(principal.user_id, current, self.clock.now())
            .await?;
        tracing::info!(user_id = %principal.user_id, revoked_sessions = revoked, "Other sessions revoked");
        Ok(revoked)
    }
}
