use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::{error::AppError, middleware::rate_limit::check_keyed};
use std::net::SocketAddr;

use crate::{
    dtos::{
        auth::{
            LoginRequest, LoginResponse, MeResponse, MfaChallengeRequest, RefreshRequest,
            RegisterOrganizationRequest, RegisterOrganizationResponse,
        },
        ErrorResponse, MessageResponse,
    },
    handlers::{status_for, ClientContext},
    middleware::AuthUser,
    models::user::normalize_email,
    services::{LoginOutcome, TokenBundle},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Create an organization with its first admin
#[utoipa::path(
    post,
    path = "/auth/register-org",
    request_body = RegisterOrganizationRequest,
    responses(
        (status = 201, description = "Organization created", body = RegisterOrganizationResponse),
        (status = 202, description = "Organization created, verification email failed", body = RegisterOrganizationResponse),
        (status = 409, description = "Organization or email already exists", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register_org(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterOrganizationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let registered = state
        .auth
        .register_organization(
            &req.organization_name,
            &req.admin_email,
            &req.admin_name,
            &Password::new(req.password),
        )
        .await?;

    let status = status_for(registered.verification, StatusCode::CREATED);
    Ok((
        status,
        Json(RegisterOrganizationResponse {
            organization_id: registered.organization.id,
            user_id: registered.admin.id,
            delivery: registered.verification,
            message: "Organization created. Check your email to verify your account.".to_string(),
        }),
    ))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued, or an MFA challenge", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Email not verified or account suspended", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    check_keyed(&state.login_email_limiter, &normalize_email(&req.email))?;

    let client = ClientContext::from_request(&headers, peer, req.device_info);
    let outcome = state
        .auth
        .login(
            &req.email,
            &Password::new(req.password),
            client.device_info,
            client.ip_address,
        )
        .await?;

    let body = match outcome {
        LoginOutcome::MfaRequired { mfa_token } => LoginResponse::challenge(mfa_token),
        LoginOutcome::Authenticated(bundle) => LoginResponse::from(bundle),
    };
    Ok(Json(body))
}

/// Complete an MFA login with a TOTP code
#[utoipa::path(
    post,
    path = "/auth/mfa/challenge",
    request_body = MfaChallengeRequest,
    responses(
        (status = 200, description = "Tokens issued", body = LoginResponse),
        (status = 400, description = "Invalid code", body = ErrorResponse),
        (status = 401, description = "Invalid or expired MFA token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn mfa_challenge(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<MfaChallengeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = ClientContext::from_request(&headers, peer, req.device_info);
    let bundle = state
        .auth
        .complete_mfa_login(
            &req.mfa_token,
            &req.code,
            client.device_info,
            client.ip_address,
        )
        .await?;
    Ok(Json(LoginResponse::from(bundle)))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = TokenBundle),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let bundle = state.auth.refresh(&req.refresh_token).await?;
    Ok(Json(bundle))
}

/// Revoke the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.auth.logout(&principal).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// Current user, role and permissions
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 404, description = "User no longer exists", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let (user, role) = state.auth.me(&principal).await?;
    Ok(Json(MeResponse::new(user, role)))
}
