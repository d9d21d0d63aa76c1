use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{CreateRoleRequest, RoleResponse, UpdateRoleRequest},
        ErrorResponse, MessageResponse,
    },
    middleware::AuthUser,
    services::RoleUpdate,
    utils::ValidatedJson,
    AppState,
};

/// Roles of the caller's organization
#[utoipa::path(
    get,
    path = "/rbac/roles",
    responses((status = 200, description = "Roles", body = [RoleResponse])),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let roles: Vec<RoleResponse> = state
        .rbac
        .list_roles(&principal)
        .await?
        .into_iter()
        .map(RoleResponse::from)
        .collect();
    Ok(Json(roles))
}

#[utoipa::path(
    get,
    path = "/rbac/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = RoleResponse),
        (status = 403, description = "Role belongs to another organization", body = ErrorResponse),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn get_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let role = state.rbac.get_role(&principal, id).await?;
    Ok(Json(RoleResponse::from(role)))
}

/// Create a custom role
#[utoipa::path(
    post,
    path = "/rbac/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleResponse),
        (status = 403, description = "Missing roles:manage", body = ErrorResponse),
        (status = 409, description = "Role name taken", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn create_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let role = state
        .rbac
        .create_role(
            &principal,
            &req.name,
            req.description,
            req.permissions.into_iter().collect(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(RoleResponse::from(role))))
}

#[utoipa::path(
    patch,
    path = "/rbac/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleResponse),
        (status = 403, description = "Forbidden or system role restriction", body = ErrorResponse),
        (status = 404, description = "Role not found", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn update_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let update = RoleUpdate {
        name: req.name,
        description: req.description,
        permissions: req.permissions.map(|p| p.into_iter().collect()),
    };
    let role = state.rbac.update_role(&principal, id, update).await?;
    Ok(Json(RoleResponse::from(role)))
}

/// Delete a custom role that nobody holds
#[utoipa::path(
    delete,
    path = "/rbac/roles/{id}",
    params(("id" = Uuid, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role deleted", body = MessageResponse),
        (status = 403, description = "System role or missing roles:manage", body = ErrorResponse),
        (status = 404, description = "Role not found", body = ErrorResponse),
        (status = 409, description = "Role still assigned to users", body = ErrorResponse)
    ),
    tag = "Roles",
    security(("bearer_auth" = []))
)]
pub async fn delete_role(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.rbac.delete_role(&principal, id).await?;
    Ok(Json(MessageResponse::new("Role deleted")))
}
