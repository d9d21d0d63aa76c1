//! Password reset and email verification.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{PasswordResetConfirm, PasswordResetRequest, SendVerificationRequest, TokenRequest},
        DeliveryResponse, ErrorResponse, MessageResponse,
    },
    handlers::status_for,
    services::ServiceError,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Request a password reset email
#[utoipa::path(
    post,
    path = "/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Always returned, whether or not the email exists", body = MessageResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Credentials"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.credentials.request_password_reset(&req.email).await?;
    Ok(Json(MessageResponse::new(
        "If an account with that email exists, a password reset link has been sent",
    )))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/auth/password-reset/reset",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid, expired or used token", body = ErrorResponse),
        (status = 422, description = "Password does not meet the policy", body = ErrorResponse)
    ),
    tag = "Credentials"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    state
        .credentials
        .reset_password(&req.token, &Password::new(req.new_password))
        .await
        .map_err(ServiceError::into_redemption_error)?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// Send a new email verification link
#[utoipa::path(
    post,
    path = "/auth/email-verification/send",
    request_body = SendVerificationRequest,
    responses(
        (status = 200, description = "Verification email sent", body = DeliveryResponse),
        (status = 202, description = "Token created, email delivery failed", body = DeliveryResponse),
        (status = 404, description = "No such user with this email", body = ErrorResponse),
        (status = 409, description = "Email already verified", body = ErrorResponse)
    ),
    tag = "Credentials"
)]
pub async fn send_verification(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendVerificationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let delivery = state
        .credentials
        .send_email_verification(req.user_id, &req.email)
        .await?;
    Ok((
        status_for(delivery, StatusCode::OK),
        Json(DeliveryResponse {
            message: "Verification email issued".to_string(),
            delivery,
        }),
    ))
}

/// Verify an email address with a token
#[utoipa::path(
    post,
    path = "/auth/email-verification/verify",
    request_body = TokenRequest,
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Invalid, expired or used token", body = ErrorResponse)
    ),
    tag = "Credentials"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .credentials
        .verify_email(&req.token)
        .await
        .map_err(ServiceError::into_redemption_error)?;
    Ok(Json(MessageResponse::new("Email verified successfully")))
}
