use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::services::{Clock, ServiceError};

/// Discriminates the three token kinds so one can never stand in for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    MfaChallenge,
}

/// Claims for access tokens (short-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Organization the user belongs to
    pub org: Uuid,
    /// Role name, informational only
    pub role: String,
    /// Session the token was issued for
    pub sid: Uuid,
    /// Whether MFA was completed for this session
    pub mfa: bool,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
    pub typ: TokenType,
}

/// Claims for refresh tokens (long-lived, bound to a session)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: Uuid,
    pub sid: Uuid,
    pub mfa: bool,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Token ID (matches database record)
    pub jti: Uuid,
    pub typ: TokenType,
}

/// Claims for the short-lived token handed out between password and TOTP steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallengeClaims {
    pub sub: Uuid,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
    pub typ: TokenType,
}

trait TypedClaims {
    fn token_type(&self) -> TokenType;
    fn expires_at(&self) -> i64;
}

macro_rules! typed_claims {
    ($($ty:ty),*) => {
        $(impl TypedClaims for $ty {
            fn token_type(&self) -> TokenType {
                self.typ
            }
            fn expires_at(&self) -> i64 {
                self.exp
            }
        })*
    };
}

typed_claims!(AccessTokenClaims, RefreshTokenClaims, MfaChallengeClaims);

/// A freshly minted refresh token and the record it must be stored under.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// JWT service for token generation and validation.
///
/// Expiry is checked against the injected clock rather than the library's
/// wall-clock check, so an elapsed TTL is reported as `TokenExpired` and every
/// other failure as `InvalidToken`.
#[derive(Clone)]
pub struct JwtService {
    keys: Option<(EncodingKey, DecodingKey)>,
    algorithm: Algorithm,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    mfa_challenge_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtService {
    /// RS256 when both key paths are configured, HS256 when a shared secret is.
    /// With neither, the service starts but every issue/verify call fails with
    /// `Configuration`.
    pub fn from_config(config: &JwtConfig, clock: Arc<dyn Clock>) -> Result<Self, ServiceError> {
        let (keys, algorithm) = match (
            &config.private_key_path,
            &config.public_key_path,
            &config.hmac_secret,
        ) {
            (Some(private_path), Some(public_path), _) => {
                let private_key_pem = fs::read_to_string(private_path).map_err(|e| {
                    ServiceError::Configuration(format!(
                        "Failed to read private key from {}: {}",
                        private_path, e
                    ))
                })?;
                let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                    .map_err(|e| {
                        ServiceError::Configuration(format!("Failed to parse private key: {}", e))
                    })?;

                let public_key_pem = fs::read_to_string(public_path).map_err(|e| {
                    ServiceError::Configuration(format!(
                        "Failed to read public key from {}: {}",
                        public_path, e
                    ))
                })?;
                let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| {
                        ServiceError::Configuration(format!("Failed to parse public key: {}", e))
                    })?;

                tracing::info!("JWT service initialized with RS256 keys");
                (Some((encoding_key, decoding_key)), Algorithm::RS256)
            }
            (_, _, Some(secret)) => {
                tracing::info!("JWT service initialized with HS256 secret");
                (
                    Some((
                        EncodingKey::from_secret(secret.as_bytes()),
                        DecodingKey::from_secret(secret.as_bytes()),
                    )),
                    Algorithm::HS256,
                )
            }
            _ => {
                tracing::warn!("JWT service initialized without signing keys");
                (None, Algorithm::HS256)
            }
        };

        Ok(Self {
            keys,
            algorithm,
            issuer: config.issuer.clone(),
            access_ttl: Duration::minutes(config.access_token_expiry_minutes),
            refresh_ttl: Duration::days(config.refresh_token_expiry_days),
            mfa_challenge_ttl: Duration::minutes(config.mfa_challenge_expiry_minutes),
            clock,
        })
    }

    /// Access token lifetime in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        role: &str,
        session_id: Uuid,
        mfa: bool,
    ) -> Result<(String, DateTime<Utc>), ServiceError> {
        let now = self.clock.now();
        let expires_at = now + self.access_ttl;

        let claims = AccessTokenClaims {
            sub: user_id,
            org: organization_id,
            role: role.to_string(),
            sid: session_id,
            mfa,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
            typ: TokenType::Access,
        };

        Ok((self.sign(&claims)?, expires_at))
    }

    pub fn issue_refresh_token(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        mfa: bool,
    ) -> Result<IssuedRefreshToken, ServiceError> {
        let now = self.clock.now();
        let expires_at = now + self.refresh_ttl;
        let jti = Uuid::new_v4();

        let claims = RefreshTokenClaims {
            sub: user_id,
            sid: session_id,
            mfa,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti,
            typ: TokenType::Refresh,
        };

        Ok(IssuedRefreshToken {
            token: self.sign(&claims)?,
            jti,
            expires_at,
        })
    }

    pub fn issue_mfa_challenge(&self, user_id: Uuid) -> Result<String, ServiceError> {
        let now = self.clock.now();

        let claims = MfaChallengeClaims {
            sub: user_id,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: (now + self.mfa_challenge_ttl).timestamp(),
            jti: Uuid::new_v4(),
            typ: TokenType::MfaChallenge,
        };

        self.sign(&claims)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, ServiceError> {
        self.verify(token, TokenType::Access)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, ServiceError> {
        self.verify(token, TokenType::Refresh)
    }

    pub fn verify_mfa_challenge(&self, token: &str) -> Result<MfaChallengeClaims, ServiceError> {
        self.verify(token, TokenType::MfaChallenge)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, ServiceError> {
        let (encoding_key, _) = self.keys()?;
        encode(&Header::new(self.algorithm), claims, encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    fn verify<T>(&self, token: &str, expected: TokenType) -> Result<T, ServiceError>
    where
        T: DeserializeOwned + TypedClaims,
    {
        let (_, decoding_key) = self.keys()?;

        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);

        let claims = decode::<T>(token, decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                ServiceError::InvalidToken
            })?
            .claims;

        if claims.token_type() != expected {
            return Err(ServiceError::InvalidToken);
        }

        if self.clock.now().timestamp() >= claims.expires_at() {
            return Err(ServiceError::TokenExpired);
        }

        Ok(claims)
    }

    fn keys(&self) -> Result<&(EncodingKey, DecodingKey), ServiceError> {
        self.keys.as_ref().ok_or_else(|| {
            ServiceError::Configuration("JWT signing key is not configured".to_string())
        })
    }
}
