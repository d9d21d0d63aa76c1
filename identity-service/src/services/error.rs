use service_core::axum::http::StatusCode;
use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token has already been used")]
    AlreadyUsed,

    #[error("Email address has not been verified")]
    EmailNotVerified,

    #[error("Multi-factor authentication required")]
    MfaRequired,

    #[error("Invalid verification code")]
    MfaVerificationFailed,

    #[error("MFA is not configured for this account")]
    MfaNotConfigured,

    #[error("Account is suspended")]
    AccountSuspended,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(anyhow::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Database(anyhow::Error::new(err))
    }
}

impl ServiceError {
    /// One-time token failures (reset, verification, invite) are reported as
    /// 400 rather than 401; the machine-readable kind is unchanged.
    pub fn into_redemption_error(self) -> AppError {
        let app: AppError = self.into();
        match app {
            AppError::Rejected {
                status: StatusCode::UNAUTHORIZED,
                kind,
                message,
            } => AppError::Rejected {
                status: StatusCode::BAD_REQUEST,
                kind,
                message,
            },
            other => other,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::InvalidCredentials => {
                AppError::rejected(StatusCode::UNAUTHORIZED, "invalid_credentials", message)
            }
            ServiceError::InvalidToken => {
                AppError::rejected(StatusCode::UNAUTHORIZED, "invalid_token", message)
            }
            ServiceError::TokenExpired => {
                AppError::rejected(StatusCode::UNAUTHORIZED, "token_expired", message)
            }
            ServiceError::AlreadyUsed => {
                AppError::rejected(StatusCode::BAD_REQUEST, "already_used", message)
            }
            ServiceError::EmailNotVerified => {
                AppError::rejected(StatusCode::FORBIDDEN, "email_not_verified", message)
            }
            ServiceError::MfaRequired => {
                AppError::rejected(StatusCode::UNAUTHORIZED, "mfa_required", message)
            }
            ServiceError::MfaVerificationFailed => {
                AppError::rejected(StatusCode::BAD_REQUEST, "mfa_verification_failed", message)
            }
            ServiceError::MfaNotConfigured => {
                AppError::rejected(StatusCode::BAD_REQUEST, "mfa_not_configured", message)
            }
            ServiceError::AccountSuspended => {
                AppError::rejected(StatusCode::FORBIDDEN, "account_suspended", message)
            }
            ServiceError::Forbidden(msg) => {
                AppError::rejected(StatusCode::FORBIDDEN, "forbidden", msg)
            }
            ServiceError::Conflict(msg) => AppError::rejected(StatusCode::CONFLICT, "conflict", msg),
            ServiceError::NotFound(msg) => {
                AppError::rejected(StatusCode::NOT_FOUND, "not_found", msg)
            }
            ServiceError::Validation(msg) => {
                AppError::rejected(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
            }
            ServiceError::Configuration(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
            ServiceError::Database(e) => AppError::DatabaseError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_and_invalid_tokens_have_distinct_kinds() {
        let expired: AppError = ServiceError::TokenExpired.into();
        let invalid: AppError = ServiceError::InvalidToken.into();

        assert_eq!(expired.kind(), "token_expired");
        assert_eq!(invalid.kind(), "invalid_token");
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn redemption_errors_become_bad_requests() {
        let err = ServiceError::TokenExpired.into_redemption_error();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "token_expired");

        let err = ServiceError::Conflict("taken".into()).into_redemption_error();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unexpected_failures_map_to_internal() {
        let err: AppError = ServiceError::Configuration("no signing key".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.kind(), "internal");
    }
}
