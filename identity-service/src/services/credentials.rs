//! Password-reset and email-verification token lifecycles.
//!
//! Both flows share one shape: issued, then consumed or expired. Consumption is
//! a single conditional write in the store, so two concurrent redemptions of
//! the same token produce exactly one success.

use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::models::user::normalize_email;
use crate::models::{OneTimeToken, TokenEffect, TokenPurpose, User};
use crate::services::email::{dispatch, Delivery, EmailMessage, EmailProvider};
use crate::services::policy::PasswordPolicy;
use crate::services::{Clock, CredentialStore, ServiceError};
use crate::utils::{generate_random_token, hash_password, hash_token, Password};

#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn CredentialStore>,
    email: Arc<dyn EmailProvider>,
    clock: Arc<dyn Clock>,
    tokens: TokenConfig,
    policy: PasswordPolicy,
    public_base_url: String,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
        tokens: TokenConfig,
        policy: PasswordPolicy,
        public_base_url: String,
    ) -> Self {
        Self {
            store,
            email,
            clock,
            tokens,
            policy,
            public_base_url,
        }
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Issues a reset token when the address belongs to a user. The result is
    /// the same whether or not it does, and delivery failures are only logged.
    #[tracing::instrument(skip_all)]
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ServiceError> {
        let Some(user) = self.store.find_user_by_email(&normalize_email(email)).await? else {
            tracing::debug!("Password reset requested for unknown address");
            return Ok(());
        };

        let token = self
            .issue(
                &user,
                TokenPurpose::PasswordReset,
                Duration::minutes(self.tokens.password_reset_ttl_minutes),
            )
            .await?;

        let message = EmailMessage::password_reset(
            &self.public_base_url,
            &token,
            self.tokens.password_reset_ttl_minutes,
        );
        if dispatch(self.email.as_ref(), &user.email, &message).await == Delivery::Failed {
            tracing::warn!(user_id = %user.id, "Password reset issued but not delivered");
        }

        tracing::info!(user_id = %user.id, "Password reset token issued");
        Ok(())
    }

    /// Consumes a reset token and sets the new password in the same write,
    /// then revokes every session of the user.
    #[tracing::instrument(skip_all)]
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &Password,
    ) -> Result<Uuid, ServiceError> {
        self.policy.validate(new_password.as_str())?;
        let password_hash = hash_password(new_password)?.into_string();

        let now = self.clock.now();
        let user_id = self
            .store
            .redeem_one_time_token(
                &hash_token(token),
                TokenEffect::SetPassword { password_hash },
                now,
            )
            .await?;

        let revoked = self.store.revoke_user_sessions(user_id, now).await?;
        tracing::info!(user_id = %user_id, revoked_sessions = revoked, "Password reset completed");
        Ok(user_id)
    }

    /// Sends a fresh verification link to a user whose address is unverified.
    #[tracing::instrument(skip(self, email))]
    pub async fn send_email_verification(
        &self,
        user_id: Uuid,
        email: &str,
    ) -> Result<Delivery, ServiceError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .filter(|u| u.email == normalize_email(email))
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))?;

        if user.email_verified {
            return Err(ServiceError::Conflict("Email is already verified".to_string()));
        }

        self.issue_email_verification(&user).await
    }

    pub(crate) async fn issue_email_verification(
        &self,
        user: &User,
    ) -> Result<Delivery, ServiceError> {
        let token = self
            .issue(
                user,
                TokenPurpose::EmailVerification,
                Duration::hours(self.tokens.email_verification_ttl_hours),
            )
            .await?;

        let message = EmailMessage::email_verification(
            &self.public_base_url,
            &token,
            self.tokens.email_verification_ttl_hours,
        );
        let delivery = dispatch(self.email.as_ref(), &user.email, &message).await;
        tracing::info!(user_id = %user.id, delivery = ?delivery, "Email verification token issued");
        Ok(delivery)
    }

    #[tracing::instrument(skip_all)]
    pub async fn verify_email(&self, token: &str) -> Result<Uuid, ServiceError> {
        let user_id = self
            .store
            .redeem_one_time_token(&hash_token(token), TokenEffect::VerifyEmail, self.clock.now())
            .await?;
        tracing::info!(user_id = %user_id, "Email verified");
        Ok(user_id)
    }

    async fn issue(
        &self,
        user: &User,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> Result<String, ServiceError> {
        let now = self.clock.now();
        let token = generate_random_token();
        let record = OneTimeToken::new(user.id, purpose, hash_token(&token), now + ttl, now);
        self.store.insert_one_time_token(&record).await?;
        Ok(token)
    }
}
