use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{AssignRoleRequest, SetUserStatusRequest},
        auth::UserResponse,
        ErrorResponse,
    },
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

/// Give a user another role in the same organization
#[utoipa::path(
    patch,
    path = "/users/{id}/role",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = UserResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 404, description = "User or role not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn assign_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.rbac.assign_role(&principal, id, req.role_id).await?;
    Ok(Json(UserResponse::from(user)))
}

/// Suspend or reactivate a user
#[utoipa::path(
    patch,
    path = "/users/{id}/status",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = SetUserStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = UserResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Users",
    security(("bearer_auth" = []))
)]
pub async fn set_status(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<SetUserStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .rbac
        .set_user_status(&principal, id, req.status)
        .await?;
    Ok(Json(UserResponse::from(user)))
}
