//! Invite-based onboarding.
//!
//! Pending, then accepted or revoked. Expiry is observed at read time and never
//! stored. Acceptance creates the user and flips the invite in one store
//! operation; any failed check leaves the invite untouched.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::user::normalize_email;
use crate::models::{Invitation, InvitationStatus, Permission, User};
use crate::services::email::{dispatch, Delivery, EmailMessage, EmailProvider};
use crate::services::policy::PasswordPolicy;
use crate::services::rbac::{ensure_same_tenant, Principal, RbacService};
use crate::services::{Clock, CredentialStore, ServiceError};
use crate::utils::{generate_random_token, hash_password, hash_token, Password};

/// A new invitation together with its raw token, returned once.
#[derive(Debug, Clone)]
pub struct CreatedInvitation {
    pub invitation: Invitation,
    pub token: String,
    pub delivery: Delivery,
}

/// Public view of an invitation looked up by token.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvitationPreview {
    pub email: String,
    pub organization_name: String,
    pub role_name: String,
    pub expires_utc: DateTime<Utc>,
    pub status: InvitationStatus,
}

#[derive(Clone)]
pub struct InvitationService {
    store: Arc<dyn CredentialStore>,
    email: Arc<dyn EmailProvider>,
    clock: Arc<dyn Clock>,
    rbac: RbacService,
    policy: PasswordPolicy,
    ttl: Duration,
    public_base_url: String,
}

impl InvitationService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
        rbac: RbacService,
        policy: PasswordPolicy,
        ttl_days: i64,
        public_base_url: String,
    ) -> Self {
        Self {
            store,
            email,
            clock,
            rbac,
            policy,
            ttl: Duration::days(ttl_days),
            public_base_url,
        }
    }

    #[tracing::instrument(skip(self, principal, email), fields(organization_id = %principal.organization_id))]
    pub async fn create_invite(
        &self,
        principal: &Principal,
        email: &str,
        role_id: Uuid,
    ) -> Result<CreatedInvitation, ServiceError> {
        self.rbac
            .require(principal, Permission::InvitesManage)
            .await?;

        let role = self
            .store
            .find_role(role_id)
            .await?
            .filter(|r| r.organization_id == principal.organization_id)
            .ok_or_else(|| ServiceError::NotFound("Role not found".to_string()))?;

        let held = self.rbac.effective_permissions(principal).await?;
        if !held.is_superset(&role.permissions) {
            return Err(ServiceError::Forbidden(
                "Cannot invite with a role whose permissions you do not hold".to_string(),
            ));
        }

        let email = normalize_email(email);
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(ServiceError::Conflict(
                "A user with this email already exists".to_string(),
            ));
        }

        let now = self.clock.now();
        let pending = self
            .store
            .list_pending_invitations(principal.organization_id, now)
            .await?;
        if pending.iter().any(|i| i.email == email) {
            return Err(ServiceError::Conflict(
                "A pending invitation already exists for this email".to_string(),
            ));
        }

        let organization = self
            .store
            .find_organization(principal.organization_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Organization not found".to_string()))?;

        let token = generate_random_token();
        let invitation = Invitation::new(
            principal.organization_id,
            email,
            role.id,
            hash_token(&token),
            principal.user_id,
            now,
            now + self.ttl,
        );
        self.store.insert_invitation(&invitation).await?;

        let message = EmailMessage::invitation(
            &self.public_base_url,
            &token,
            &organization.name,
            &role.name,
            invitation.expires_utc,
        );
        let delivery = dispatch(self.email.as_ref(), &invitation.email, &message).await;

        tracing::info!(invitation_id = %invitation.id, delivery = ?delivery, "Invitation created");
        Ok(CreatedInvitation {
            invitation,
            token,
            delivery,
        })
    }

    pub async fn list_pending(&self, principal: &Principal) -> Result<Vec<Invitation>, ServiceError> {
        self.rbac
            .require(principal, Permission::InvitesManage)
            .await?;
        self.store
            .list_pending_invitations(principal.organization_id, self.clock.now())
            .await
    }

    pub async fn preview(&self, token: &str) -> Result<InvitationPreview, ServiceError> {
        let invitation = self
            .store
            .find_invitation_by_token(&hash_token(token))
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let organization_name = self
            .store
            .find_organization(invitation.organization_id)
            .await?
            .map(|o| o.name)
            .unwrap_or_default();
        let role_name = match invitation.role_id {
            Some(role_id) => self
                .store
                .find_role(role_id)
                .await?
                .map(|r| r.name)
                .unwrap_or_default(),
            None => String::new(),
        };

        Ok(InvitationPreview {
            status: invitation.effective_status(self.clock.now()),
            email: invitation.email,
            organization_name,
            role_name,
            expires_utc: invitation.expires_utc,
        })
    }

    /// Creates the invited user (email counts as verified) and marks the invite
    /// accepted. Exactly one of any number of concurrent calls succeeds.
    #[tracing::instrument(skip_all)]
    pub async fn accept(
        &self,
        token: &str,
        name: &str,
        password: &Password,
    ) -> Result<User, ServiceError> {
        let invitation = self
            .store
            .find_invitation_by_token(&hash_token(token))
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let now = self.clock.now();
        match invitation.effective_status(now) {
            InvitationStatus::Pending => {}
            InvitationStatus::Accepted => return Err(ServiceError::AlreadyUsed),
            InvitationStatus::Revoked => return Err(ServiceError::InvalidToken),
            InvitationStatus::Expired => return Err(ServiceError::TokenExpired),
        }

        // Pending invitations pin their role against deletion
        let role_id = invitation.role_id.ok_or(ServiceError::InvalidToken)?;

        self.policy.validate(password.as_str())?;

        if self
            .store
            .find_user_by_email(&invitation.email)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(
                "A user with this email already exists".to_string(),
            ));
        }

        let mut user = User::new(
            invitation.organization_id,
            &invitation.email,
            name.trim().to_string(),
            hash_password(password)?.into_string(),
            role_id,
            now,
        );
        user.email_verified = true;

        // Re-checks status, expiry and email under the store's atomicity
        let accepted = self.store.accept_invitation(invitation.id, &user, now).await?;

        tracing::info!(
            invitation_id = %accepted.id,
            user_id = %user.id,
            organization_id = %user.organization_id,
            "Invitation accepted"
        );
        Ok(user)
    }

    /// Only pending invitations can be revoked.
    pub async fn revoke(&self, principal: &Principal, invitation_id: Uuid) -> Result<(), ServiceError> {
        let invitation = self
            .store
            .find_invitation(invitation_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Invitation not found".to_string()))?;
        ensure_same_tenant(principal, invitation.organization_id)?;
        self.rbac
            .require(principal, Permission::InvitesManage)
            .await?;

        if !self.store.revoke_invitation(invitation_id).await? {
            return Err(ServiceError::Conflict(
                "Only pending invitations can be revoked".to_string(),
            ));
        }
        tracing::info!(invitation_id = %invitation_id, "Invitation revoked");
        Ok(())
    }
}
