use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::user::normalize_email;
use crate::models::{Organization, RefreshToken, Role, SystemRole, User};
use crate::services::email::Delivery;
use crate::services::rbac::Principal;
use crate::services::{
    Clock, CredentialService, CredentialStore, JwtService, MfaService, RbacService, ServiceError,
    SessionService,
};
use crate::utils::{hash_password, verify_decoy, verify_password, Password, PasswordHashString};

/// Tokens handed to a client after a completed sign-in or refresh.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub session_id: Uuid,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Password accepted; a TOTP code must follow with this challenge token.
    MfaRequired { mfa_token: String },
    Authenticated(TokenBundle),
}

#[derive(Debug, Clone)]
pub struct RegisteredOrganization {
    pub organization: Organization,
    pub admin: User,
    pub verification: Delivery,
}

/// Authentication flows and the request gateway.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    jwt: JwtService,
    credentials: CredentialService,
    mfa: MfaService,
    sessions: SessionService,
    rbac: RbacService,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        jwt: JwtService,
        credentials: CredentialService,
        mfa: MfaService,
        sessions: SessionService,
        rbac: RbacService,
    ) -> Self {
        Self {
            store,
            clock,
            jwt,
            credentials,
            mfa,
            sessions,
            rbac,
        }
    }

    /// Creates the organization, its seeded roles and the first admin, then
    /// sends the admin a verification link.
    #[tracing::instrument(skip(self, admin_email, admin_name, password))]
    pub async fn register_organization(
        &self,
        organization_name: &str,
        admin_email: &str,
        admin_name: &str,
        password: &Password,
    ) -> Result<RegisteredOrganization, ServiceError> {
        let organization_name = organization_name.trim();
        if organization_name.is_empty() {
            return Err(ServiceError::Validation(
                "Organization name is required".to_string(),
            ));
        }
        self.credentials.policy().validate(password.as_str())?;

        let now = self.clock.now();
        let organization = Organization::new(organization_name.to_string(), now);
        let roles = self.rbac.seed_roles(organization.id);
        let admin_role = roles
            .iter()
            .find(|r| r.name == SystemRole::Admin.name())
            .map(|r| r.id)
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("Admin role was not seeded")))?;

        let admin = User::new(
            organization.id,
            admin_email,
            admin_name.trim().to_string(),
            hash_password(password)?.into_string(),
            admin_role,
            now,
        );

        self.store
            .create_organization(&organization, &roles, &admin)
            .await?;
        tracing::info!(
            organization_id = %organization.id,
            user_id = %admin.id,
            "Organization registered"
        );

        // Committed above; verification can be re-sent
        let verification = match self.credentials.issue_email_verification(&admin).await {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::warn!(
                    user_id = %admin.id,
                    error = %e,
                    "Could not issue email verification after registration"
                );
                Delivery::Failed
            }
        };

        Ok(RegisteredOrganization {
            organization,
            admin,
            verification,
        })
    }

    /// Check order: credentials, suspension, email verification, MFA.
    #[tracing::instrument(skip(self, email, password, device_info, ip_address))]
    pub async fn login(
        &self,
        email: &str,
        password: &Password,
        device_info: Option<String>,
        ip_address: Option<String>,
    ) -> Result<LoginOutcome, ServiceError> {
        let Some(user) = self
            .store
            .find_user_by_email(&normalize_email(email))
            .await?
        else {
            verify_decoy(password);
            return Err(ServiceError::InvalidCredentials);
        };

        let stored = PasswordHashString::new(user.password_hash.clone());
        if !verify_password(password, &stored)? {
            tracing::info!(user_id = %user.id, "Login failed: wrong password");
            return Err(ServiceError::InvalidCredentials);
        }

        self.ensure_may_sign_in(&user).await?;

        if user.mfa_enabled {
            tracing::info!(user_id = %user.id, "Login requires MFA");
            return Ok(LoginOutcome::MfaRequired {
                mfa_token: self.jwt.issue_mfa_challenge(user.id)?,
            });
        }

        let bundle = self
            .start_session(&user, device_info, ip_address, false)
            .await?;
        tracing::info!(user_id = %user.id, session_id = %bundle.session_id, "Login succeeded");
        Ok(LoginOutcome::Authenticated(bundle))
    }

    /// Second login step for MFA accounts.
    #[tracing::instrument(skip_all)]
    pub async fn complete_mfa_login(
        &self,
        mfa_token: &str,
        code: &str,
        device_info: Option<String>,
        ip_address: Option<String>,
    ) -> Result<TokenBundle, ServiceError> {
        let claims = self.jwt.verify_mfa_challenge(mfa_token)?;
        let user = self
            .store
            .find_user(claims.sub)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        self.ensure_may_sign_in(&user).await?;
        if !user.mfa_enabled {
            return Err(ServiceError::MfaNotConfigured);
        }
        self.mfa.check_code(&user, code)?;

        let bundle = self
            .start_session(&user, device_info, ip_address, true)
            .await?;
        tracing::info!(user_id = %user.id, session_id = %bundle.session_id, "MFA login succeeded");
        Ok(bundle)
    }

    /// Records a session and issues the first token pair for it.
    pub async fn start_session(
        &self,
        user: &User,
        device_info: Option<String>,
        ip_address: Option<String>,
        mfa: bool,
    ) -> Result<TokenBundle, ServiceError> {
        let role = self.role_name(user).await?;
        let session = self
            .sessions
            .create_session(user.id, user.organization_id, device_info, ip_address)
            .await?;

        let issued = self.jwt.issue_refresh_token(user.id, session.id, mfa)?;
        self.store
            .insert_refresh_token(&RefreshToken::new(
                issued.jti,
                user.id,
                session.id,
                issued.expires_at,
                self.clock.now(),
            ))
            .await?;

        let (access_token, _) =
            self.jwt
                .issue_access_token(user.id, user.organization_id, &role, session.id, mfa)?;

        Ok(self.bundle(access_token, issued.token, session.id))
    }

    /// Exchanges a refresh token for a new pair. The presented token is
    /// consumed; presenting it again fails with `InvalidToken`, as does any
    /// refresh on a revoked session.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, ServiceError> {
        let claims = self.jwt.verify_refresh_token(refresh_token)?;
        let user = self
            .store
            .find_user(claims.sub)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !user.is_active() {
            return Err(ServiceError::AccountSuspended);
        }
        if user.mfa_enabled && !claims.mfa {
            return Err(ServiceError::MfaRequired);
        }

        let now = self.clock.now();
        let issued = self.jwt.issue_refresh_token(user.id, claims.sid, claims.mfa)?;
        let replacement = RefreshToken::new(issued.jti, user.id, claims.sid, issued.expires_at, now);

        if !self
            .store
            .rotate_refresh_token(claims.jti, &replacement, now)
            .await?
        {
            tracing::warn!(user_id = %user.id, session_id = %claims.sid, "Refresh token rejected");
            return Err(ServiceError::InvalidToken);
        }

        let role = self.role_name(&user).await?;
        let (access_token, _) = self.jwt.issue_access_token(
            user.id,
            user.organization_id,
            &role,
            claims.sid,
            claims.mfa,
        )?;

        Ok(self.bundle(access_token, issued.token, claims.sid))
    }

    /// Revokes the caller's current session and its refresh tokens.
    pub async fn logout(&self, principal: &Principal) -> Result<(), ServiceError> {
        principal.require_user()?;
        let session_id = principal.session_id.ok_or_else(|| {
            ServiceError::Validation("Request is not bound to a session".to_string())
        })?;
        self.store
            .revoke_session(session_id, self.clock.now())
            .await?;
        tracing::info!(user_id = %principal.user_id, session_id = %session_id, "Logged out");
        Ok(())
    }

    /// Current user and role. `NotFound` if the user was deleted after the
    /// token was issued.
    pub async fn me(&self, principal: &Principal) -> Result<(User, Option<Role>), ServiceError> {
        let user = self
            .store
            .find_user(principal.user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User no longer exists".to_string()))?;
        let role = self
            .store
            .find_role(user.role_id)
            .await?
            .filter(|r| r.organization_id == user.organization_id);
        Ok((user, role))
    }

    /// Resolves a bearer access token into a principal. A token minted without
    /// MFA is refused once the account has MFA enabled.
    pub async fn authenticate(&self, bearer: &str) -> Result<Principal, ServiceError> {
        let claims = self.jwt.verify_access_token(bearer)?;

        if !claims.mfa {
            if let Some(user) = self.store.find_user(claims.sub).await? {
                if user.mfa_enabled {
                    return Err(ServiceError::MfaRequired);
                }
            }
        }

        Ok(Principal {
            user_id: claims.sub,
            organization_id: claims.org,
            role: claims.role,
            session_id: Some(claims.sid),
            api_key: None,
        })
    }

    async fn ensure_may_sign_in(&self, user: &User) -> Result<(), ServiceError> {
        if !user.is_active() {
            return Err(ServiceError::AccountSuspended);
        }
        let organization_active = self
            .store
            .find_organization(user.organization_id)
            .await?
            .map(|o| o.is_active())
            .unwrap_or(false);
        if !organization_active {
            return Err(ServiceError::AccountSuspended);
        }
        if !user.email_verified {
            return Err(ServiceError::EmailNotVerified);
        }
        Ok(())
    }

    async fn role_name(&self, user: &User) -> Result<String, ServiceError> {
        Ok(self
            .store
            .find_role(user.role_id)
            .await?
            .map(|r| r.name)
            .unwrap_or_default())
    }

    fn bundle(&self, access_token: String, refresh_token: String, session_id: Uuid) -> TokenBundle {
        TokenBundle {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_seconds(),
            session_id,
        }
    }
}
