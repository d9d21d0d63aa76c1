use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{
            AcceptInviteRequest, AcceptInviteResponse, CreateInviteRequest, CreateInviteResponse,
            InviteResponse,
        },
        ErrorResponse, MessageResponse,
    },
    handlers::{status_for, ClientContext},
    middleware::AuthUser,
    services::{InvitationPreview, ServiceError},
    utils::{Password, ValidatedJson},
    AppState,
};

/// Invite someone into the caller's organization
#[utoipa::path(
    post,
    path = "/invites",
    request_body = CreateInviteRequest,
    responses(
        (status = 201, description = "Invitation created and emailed", body = CreateInviteResponse),
        (status = 202, description = "Invitation created, email delivery failed", body = CreateInviteResponse),
        (status = 403, description = "Missing invites:manage", body = ErrorResponse),
        (status = 409, description = "User or pending invite already exists", body = ErrorResponse)
    ),
    tag = "Invitations",
    security(("bearer_auth" = []))
)]
pub async fn create_invite(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateInviteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .invitations
        .create_invite(&principal, &req.email, req.role_id)
        .await?;
    Ok((
        status_for(created.delivery, StatusCode::CREATED),
        Json(CreateInviteResponse::from(created)),
    ))
}

/// Pending invitations of the caller's organization
#[utoipa::path(
    get,
    path = "/invites",
    responses(
        (status = 200, description = "Pending invitations", body = [InviteResponse]),
        (status = 403, description = "Missing invites:manage", body = ErrorResponse)
    ),
    tag = "Invitations",
    security(("bearer_auth" = []))
)]
pub async fn list_invites(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let invites: Vec<InviteResponse> = state
        .invitations
        .list_pending(&principal)
        .await?
        .into_iter()
        .map(InviteResponse::from)
        .collect();
    Ok(Json(invites))
}

/// Revoke a pending invitation
#[utoipa::path(
    delete,
    path = "/invites/{id}",
    params(("id" = Uuid, Path, description = "Invitation id")),
    responses(
        (status = 200, description = "Invitation revoked", body = MessageResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 404, description = "Invitation not found", body = ErrorResponse),
        (status = 409, description = "Invitation is not pending", body = ErrorResponse)
    ),
    tag = "Invitations",
    security(("bearer_auth" = []))
)]
pub async fn revoke_invite(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.invitations.revoke(&principal, id).await?;
    Ok(Json(MessageResponse::new("Invitation revoked")))
}

/// Public preview of an invitation
#[utoipa::path(
    get,
    path = "/invites/preview/{token}",
    params(("token" = String, Path, description = "Invitation token from the email link")),
    responses(
        (status = 200, description = "Invitation details", body = InvitationPreview),
        (status = 400, description = "Unknown token", body = ErrorResponse)
    ),
    tag = "Invitations"
)]
pub async fn preview_invite(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let preview = state
        .invitations
        .preview(&token)
        .await
        .map_err(ServiceError::into_redemption_error)?;
    Ok(Json(preview))
}

/// Accept an invitation, create the account and sign it in
#[utoipa::path(
    post,
    path = "/invites/accept",
    request_body = AcceptInviteRequest,
    responses(
        (status = 201, description = "Account created and signed in", body = AcceptInviteResponse),
        (status = 400, description = "Invalid, expired or already accepted invite", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Password does not meet the policy", body = ErrorResponse)
    ),
    tag = "Invitations"
)]
pub async fn accept_invite(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<AcceptInviteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .invitations
        .accept(&req.token, &req.name, &Password::new(req.password))
        .await
        .map_err(ServiceError::into_redemption_error)?;

    let client = ClientContext::from_request(&headers, peer, req.device_info);
    let tokens = state
        .auth
        .start_session(&user, client.device_info, client.ip_address, false)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AcceptInviteResponse {
            user: user.into(),
            tokens,
        }),
    ))
}
