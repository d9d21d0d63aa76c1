//! TOTP multi-factor authentication.
//!
//! Per-user state: no secret, secret generated (possibly verified), enabled.
//! A secret only counts once `enable` has succeeded.

use serde::Serialize;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::User;
use crate::services::{Clock, CredentialStore, ServiceError};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Enrollment material shown to the user once.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MfaEnrollment {
    /// Base32 secret for manual entry
    pub secret: String,
    /// `otpauth://` URI for QR rendering
    pub otpauth_url: String,
}

#[derive(Clone)]
pub struct MfaService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    issuer: String,
}

impl MfaService {
    pub fn new(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>, issuer: String) -> Self {
        Self {
            store,
            clock,
            issuer,
        }
    }

    /// Generates a fresh secret, replacing any earlier one and clearing both
    /// MFA flags. Refused while MFA is enabled: that path must go through
    /// `disable`, which demands a valid code.
    #[tracing::instrument(skip(self))]
    pub async fn generate_secret(&self, user_id: Uuid) -> Result<MfaEnrollment, ServiceError> {
        let user = self.load_user(user_id).await?;
        if user.mfa_enabled {
            return Err(ServiceError::Conflict(
                "MFA is already enabled; disable it before enrolling again".to_string(),
            ));
        }

        let secret_bytes = Secret::generate_secret().to_bytes().map_err(|e| {
            ServiceError::Internal(anyhow::anyhow!("Secret generation failed: {}", e))
        })?;
        let totp = self.build(secret_bytes, &user.email)?;
        let enrollment = MfaEnrollment {
            secret: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
        };

        self.store
            .set_mfa_secret(user_id, &enrollment.secret)
            .await?;

        tracing::info!(user_id = %user_id, "MFA secret generated");
        Ok(enrollment)
    }

    /// Checks `code` against the stored secret and marks the secret verified.
    /// Does not enable MFA.
    #[tracing::instrument(skip(self, code))]
    pub async fn verify_code(&self, user_id: Uuid, code: &str) -> Result<(), ServiceError> {
        let user = self.load_user(user_id).await?;
        self.check_code(&user, code)?;
        self.store.mark_mfa_verified(user_id).await?;
        Ok(())
    }

    /// Turns MFA on. Only one caller can make the transition; a concurrent
    /// duplicate gets `Conflict`.
    #[tracing::instrument(skip(self))]
    pub async fn enable(&self, user_id: Uuid) -> Result<(), ServiceError> {
        if self.store.enable_mfa(user_id).await? {
            tracing::info!(user_id = %user_id, "MFA enabled");
            return Ok(());
        }

        let user = self.load_user(user_id).await?;
        if user.mfa_enabled {
            Err(ServiceError::Conflict("MFA is already enabled".to_string()))
        } else if user.mfa_secret.is_none() {
            Err(ServiceError::MfaNotConfigured)
        } else {
            Err(ServiceError::Validation(
                "A code must be verified before MFA can be enabled".to_string(),
            ))
        }
    }

    pub async fn verify_and_enable(&self, user_id: Uuid, code: &str) -> Result<(), ServiceError> {
        self.verify_code(user_id, code).await?;
        self.enable(user_id).await
    }

    /// Clears the secret and both flags. Requires a currently valid code
    /// regardless of who is asking.
    #[tracing::instrument(skip(self, code))]
    pub async fn disable(&self, user_id: Uuid, code: &str) -> Result<(), ServiceError> {
        let user = self.load_user(user_id).await?;
        self.check_code(&user, code)?;
        self.store.clear_mfa(user_id).await?;
        tracing::info!(user_id = %user_id, "MFA disabled");
        Ok(())
    }

    pub async fn is_enabled(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.load_user(user_id).await?.mfa_enabled)
    }

    /// Pure check against the user's stored secret, ±1 step.
    pub fn check_code(&self, user: &User, code: &str) -> Result<(), ServiceError> {
        let secret = user
            .mfa_secret
            .as_deref()
            .ok_or(ServiceError::MfaNotConfigured)?;

        let code = code.trim();
        if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServiceError::MfaVerificationFailed);
        }

        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Stored MFA secret is corrupt: {}", e)))?;
        let totp = self.build(secret_bytes, &user.email)?;

        let now = self.clock.now().timestamp().max(0) as u64;
        if totp.check(code, now) {
            Ok(())
        } else {
            tracing::debug!(user_id = %user.id, "MFA code rejected");
            Err(ServiceError::MfaVerificationFailed)
        }
    }

    fn build(&self, secret: Vec<u8>, account: &str) -> Result<TOTP, ServiceError> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("TOTP init error: {}", e)))
    }

    async fn load_user(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Organization, Role, SystemRole};
    use crate::services::{InMemoryStore, MockClock};
    use chrono::{DateTime, Duration, Utc};

    // Aligned to a 30 second step boundary
    const T0: i64 = 1_700_000_010;

    struct Fixture {
        mfa: MfaService,
        clock: Arc<MockClock>,
        store: Arc<InMemoryStore>,
        user_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let start = DateTime::<Utc>::from_timestamp(T0, 0).unwrap();
        let clock = Arc::new(MockClock::new(start));
        let store = Arc::new(InMemoryStore::new());

        let org = Organization::new("Acme".to_string(), start);
        let roles: Vec<Role> = SystemRole::ALL
            .iter()
            .map(|k| Role::system(org.id, *k, start))
            .collect();
        let user = User::new(
            org.id,
            "alice@example.test",
            "Alice".to_string(),
            "hash".to_string(),
            roles[0].id,
            start,
        );
        store.create_organization(&org, &roles, &user).await.unwrap();

        Fixture {
            mfa: MfaService::new(store.clone(), clock.clone(), "Identity".to_string()),
            clock,
            store,
            user_id: user.id,
        }
    }

    fn code_at(secret: &str, at: i64) -> String {
        let bytes = Secret::Encoded(secret.to_string()).to_bytes().unwrap();
        TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes, None, "x".to_string())
            .unwrap()
            .generate(at as u64)
    }

    #[tokio::test]
    async fn test_generate_secret_resets_flags() {
        let f = fixture().await;
        let enrollment = f.mfa.generate_secret(f.user_id).await.unwrap();
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));

        f.mfa
            .verify_code(f.user_id, &code_at(&enrollment.secret, T0))
            .await
            .unwrap();
        let user = f.store.find_user(f.user_id).await.unwrap().unwrap();
        assert!(user.mfa_verified);
        assert!(!user.mfa_enabled);

        let second = f.mfa.generate_secret(f.user_id).await.unwrap();
        assert_ne!(second.secret, enrollment.secret);
        let user = f.store.find_user(f.user_id).await.unwrap().unwrap();
        assert!(!user.mfa_verified);
        assert!(!user.mfa_enabled);
    }

    #[tokio::test]
    async fn test_verify_accepts_one_step_of_skew() {
        let f = fixture().await;
        let secret = f.mfa.generate_secret(f.user_id).await.unwrap().secret;
        let code = code_at(&secret, T0);

        f.clock.set(DateTime::from_timestamp(T0 + 30, 0).unwrap());
        assert!(f.mfa.verify_code(f.user_id, &code).await.is_ok());

        f.clock.set(DateTime::from_timestamp(T0 - 30, 0).unwrap());
        assert!(f.mfa.verify_code(f.user_id, &code).await.is_ok());

        f.clock.set(DateTime::from_timestamp(T0 + 60, 0).unwrap());
        assert!(matches!(
            f.mfa.verify_code(f.user_id, &code).await,
            Err(ServiceError::MfaVerificationFailed)
        ));

        f.clock.set(DateTime::from_timestamp(T0 - 60, 0).unwrap());
        assert!(matches!(
            f.mfa.verify_code(f.user_id, &code).await,
            Err(ServiceError::MfaVerificationFailed)
        ));
    }

    #[tokio::test]
    async fn test_verify_without_secret_is_not_configured() {
        let f = fixture().await;
        assert!(matches!(
            f.mfa.verify_code(f.user_id, "123456").await,
            Err(ServiceError::MfaNotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_enable_requires_prior_verification() {
        let f = fixture().await;
        let secret = f.mfa.generate_secret(f.user_id).await.unwrap().secret;

        assert!(matches!(
            f.mfa.enable(f.user_id).await,
            Err(ServiceError::Validation(_))
        ));

        f.mfa
            .verify_and_enable(f.user_id, &code_at(&secret, T0))
            .await
            .unwrap();
        assert!(f.mfa.is_enabled(f.user_id).await.unwrap());

        assert!(matches!(
            f.mfa.enable(f.user_id).await,
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            f.mfa.generate_secret(f.user_id).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_enable_has_one_winner() {
        let f = fixture().await;
        let secret = f.mfa.generate_secret(f.user_id).await.unwrap().secret;
        let code = code_at(&secret, T0);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let mfa = f.mfa.clone();
                let code = code.clone();
                let user_id = f.user_id;
                tokio::spawn(async move { mfa.verify_and_enable(user_id, &code).await })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_disable_requires_valid_code() {
        let f = fixture().await;
        let secret = f.mfa.generate_secret(f.user_id).await.unwrap().secret;
        f.mfa
            .verify_and_enable(f.user_id, &code_at(&secret, T0))
            .await
            .unwrap();

        f.clock.advance(Duration::minutes(10));
        let stale = code_at(&secret, T0);
        assert!(matches!(
            f.mfa.disable(f.user_id, &stale).await,
            Err(ServiceError::MfaVerificationFailed)
        ));
        assert!(matches!(
            f.mfa.disable(f.user_id, "").await,
            Err(ServiceError::MfaVerificationFailed)
        ));
        assert!(f.mfa.is_enabled(f.user_id).await.unwrap());

        let fresh = code_at(&secret, T0 + 600);
        f.mfa.disable(f.user_id, &fresh).await.unwrap();
        let user = f.store.find_user(f.user_id).await.unwrap().unwrap();
        assert!(user.mfa_secret.is_none());
        assert!(!user.mfa_enabled && !user.mfa_verified);
    }
}
