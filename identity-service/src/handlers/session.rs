use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{RevokeOthersResponse, SessionResponse},
        ErrorResponse,
    },
    middleware::AuthUser,
    AppState,
};

fn to_responses(sessions: Vec<crate::models::Session>) -> Vec<SessionResponse> {
    sessions.into_iter().map(SessionResponse::from).collect()
}

/// The caller's own sessions
#[utoipa::path(
    get,
    path = "/sessions",
    responses((status = 200, description = "Sessions, newest first", body = [SessionResponse])),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.sessions.list_sessions(&principal).await?;
    Ok(Json(to_responses(sessions)))
}

/// Every session in the caller's organization
#[utoipa::path(
    get,
    path = "/sessions/org",
    responses(
        (status = 200, description = "Organization sessions", body = [SessionResponse]),
        (status = 403, description = "Missing sessions:manage", body = ErrorResponse)
    ),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn list_org_sessions(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.sessions.list_org_sessions(&principal).await?;
    Ok(Json(to_responses(sessions)))
}

/// Revoke a session
#[utoipa::path(
    patch,
    path = "/sessions/{id}/revoke",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session revoked", body = SessionResponse),
        (status = 403, description = "Not the owner and missing sessions:manage", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn revoke_session(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions.revoke(&principal, id).await?;
    Ok(Json(SessionResponse::from(session)))
}

/// Log out every other device
#[utoipa::path(
    post,
    path = "/sessions/revoke-others",
    responses((status = 200, description = "Number of sessions revoked", body = RevokeOthersResponse)),
    tag = "Sessions",
    security(("bearer_auth" = []))
)]
pub async fn revoke_other_sessions(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.sessions.revoke_all_except(&principal).await?;
    Ok(Json(RevokeOthersResponse { revoked }))
}
