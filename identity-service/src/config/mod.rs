use serde::Deserialize;
use service_core::config::{self as core_config, get_env, get_env_opt, parse_env};
use service_core::error::AppError;
use std::env;

use crate::services::policy::PasswordPolicy;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub smtp: SmtpConfig,
    pub mfa: MfaConfig,
    pub tokens: TokenConfig,
    pub password_policy: PasswordPolicy,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Signing material. RS256 when both key paths are set, HS256 when only a
/// shared secret is set.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub private_key_path: Option<String>,
    pub public_key_path: Option<String>,
    pub hmac_secret: Option<String>,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub mfa_challenge_expiry_minutes: i64,
}

impl JwtConfig {
    pub fn has_signing_key(&self) -> bool {
        self.hmac_secret.is_some()
            || (self.private_key_path.is_some() && self.public_key_path.is_some())
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub password_reset_ttl_minutes: i64,
    pub email_verification_ttl_hours: i64,
    pub invite_ttl_days: i64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub mfa_attempts: u32,
    pub mfa_window_seconds: u64,
    pub password_reset_attempts: u32,
    pub password_reset_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl IdentityConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = IdentityConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("identity-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            database: DatabaseConfig {
                url: get_env(
                    "DATABASE_URL",
                    (!is_prod).then_some("postgres://localhost/identity"),
                    is_prod,
                )?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1)?,
            },
            jwt: JwtConfig {
                private_key_path: get_env_opt("JWT_PRIVATE_KEY_PATH"),
                public_key_path: get_env_opt("JWT_PUBLIC_KEY_PATH"),
                hmac_secret: get_env_opt("JWT_HMAC_SECRET"),
                issuer: get_env("JWT_ISSUER", Some("identity-service"), is_prod)?,
                access_token_expiry_minutes: parse_env("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", 15)?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", 7)?,
                mfa_challenge_expiry_minutes: parse_env("JWT_MFA_CHALLENGE_EXPIRY_MINUTES", 5)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", (!is_prod).then_some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", 587)?,
                user: get_env_opt("SMTP_USER"),
                password: get_env_opt("SMTP_PASSWORD"),
                from: get_env(
                    "SMTP_FROM",
                    (!is_prod).then_some("no-reply@localhost"),
                    is_prod,
                )?,
            },
            mfa: MfaConfig {
                issuer: get_env("MFA_ISSUER", Some("Identity"), is_prod)?,
            },
            tokens: TokenConfig {
                password_reset_ttl_minutes: parse_env("PASSWORD_RESET_TTL_MINUTES", 60)?,
                email_verification_ttl_hours: parse_env("EMAIL_VERIFICATION_TTL_HOURS", 24)?,
                invite_ttl_days: parse_env("INVITE_TTL_DAYS", 7)?,
            },
            password_policy: PasswordPolicy {
                min_length: parse_env("PASSWORD_MIN_LENGTH", 8)?,
                require_uppercase: parse_env("PASSWORD_REQUIRE_UPPERCASE", true)?,
                require_number: parse_env("PASSWORD_REQUIRE_NUMBER", true)?,
                require_special: parse_env("PASSWORD_REQUIRE_SPECIAL", false)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    (!is_prod).then_some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
                public_base_url: get_env(
                    "PUBLIC_BASE_URL",
                    (!is_prod).then_some("http://localhost:3000"),
                    is_prod,
                )?
                .trim_end_matches('/')
                .to_string(),
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", 5)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", 900)?,
                mfa_attempts: parse_env("RATE_LIMIT_MFA_ATTEMPTS", 5)?,
                mfa_window_seconds: parse_env("RATE_LIMIT_MFA_WINDOW_SECONDS", 300)?,
                password_reset_attempts: parse_env("RATE_LIMIT_PASSWORD_RESET_ATTEMPTS", 3)?,
                password_reset_window_seconds: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                    3600,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", 100)?,
                global_ip_window_seconds: parse_env("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", 60)?,
            },
            observability: ObservabilityConfig {
                log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
                otlp_endpoint: get_env_opt("OTLP_ENDPOINT"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        let ttls = [
            ("JWT_ACCESS_TOKEN_EXPIRY_MINUTES", self.jwt.access_token_expiry_minutes),
            ("JWT_REFRESH_TOKEN_EXPIRY_DAYS", self.jwt.refresh_token_expiry_days),
            ("JWT_MFA_CHALLENGE_EXPIRY_MINUTES", self.jwt.mfa_challenge_expiry_minutes),
            ("PASSWORD_RESET_TTL_MINUTES", self.tokens.password_reset_ttl_minutes),
            ("EMAIL_VERIFICATION_TTL_HOURS", self.tokens.email_verification_ttl_hours),
            ("INVITE_TTL_DAYS", self.tokens.invite_ttl_days),
        ];
        if let Some((key, _)) = ttls.iter().find(|(_, value)| *value <= 0) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "{} must be positive",
                key
            )));
        }

        if self.password_policy.min_length == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PASSWORD_MIN_LENGTH must be at least 1"
            )));
        }

        if self.is_prod() {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.jwt.has_signing_key() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "JWT_HMAC_SECRET or JWT_PRIVATE_KEY_PATH/JWT_PUBLIC_KEY_PATH must be set in production"
                )));
            }
        } else if !self.jwt.has_signing_key() {
            tracing::warn!("No JWT signing key configured; token issuance will fail");
        }

        Ok(())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
