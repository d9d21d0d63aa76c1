use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{auth::MfaCodeRequest, ErrorResponse, MessageResponse},
    middleware::AuthUser,
    services::MfaEnrollment,
    utils::ValidatedJson,
    AppState,
};

/// Generate a TOTP secret for the current user
#[utoipa::path(
    post,
    path = "/auth/mfa/setup",
    responses(
        (status = 200, description = "Secret and provisioning URI", body = MfaEnrollment),
        (status = 409, description = "MFA already enabled", body = ErrorResponse)
    ),
    tag = "MFA",
    security(("bearer_auth" = []))
)]
pub async fn setup(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    principal.require_user()?;
    let enrollment = state.mfa.generate_secret(principal.user_id).await?;
    Ok(Json(enrollment))
}

/// Confirm the first code and enable MFA
#[utoipa::path(
    post,
    path = "/auth/mfa/verify",
    request_body = MfaCodeRequest,
    responses(
        (status = 200, description = "MFA enabled", body = MessageResponse),
        (status = 400, description = "Invalid code or MFA not set up", body = ErrorResponse),
        (status = 409, description = "MFA already enabled", body = ErrorResponse)
    ),
    tag = "MFA",
    security(("bearer_auth" = []))
)]
pub async fn verify(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidatedJson(req): ValidatedJson<MfaCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    principal.require_user()?;
    state
        .mfa
        .verify_and_enable(principal.user_id, &req.code)
        .await?;
    Ok(Json(MessageResponse::new("MFA enabled")))
}

/// Disable MFA with a current code
#[utoipa::path(
    post,
    path = "/auth/mfa/disable",
    request_body = MfaCodeRequest,
    responses(
        (status = 200, description = "MFA disabled", body = MessageResponse),
        (status = 400, description = "Invalid code or MFA not set up", body = ErrorResponse)
    ),
    tag = "MFA",
    security(("bearer_auth" = []))
)]
pub async fn disable(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidatedJson(req): ValidatedJson<MfaCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    principal.require_user()?;
    state.mfa.disable(principal.user_id, &req.code).await?;
    Ok(Json(MessageResponse::new("MFA disabled")))
}
