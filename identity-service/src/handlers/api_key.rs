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
        admin::{ApiKeyResponse, CreateApiKeyRequest, CreateApiKeyResponse},
        ErrorResponse,
    },
    middleware::AuthUser,
    utils::ValidatedJson,
    AppState,
};

/// Mint an API key; the key material is only returned here
#[utoipa::path(
    post,
    path = "/api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key created", body = CreateApiKeyResponse),
        (status = 403, description = "Missing api_keys:manage or permission escalation", body = ErrorResponse)
    ),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn create_api_key(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    ValidatedJson(req): ValidatedJson<CreateApiKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .api_keys
        .create(&principal, &req.name, req.permissions.into_iter().collect())
        .await?;
    Ok((StatusCode::CREATED, Json(CreateApiKeyResponse::from(created))))
}

#[utoipa::path(
    get,
    path = "/api-keys",
    responses(
        (status = 200, description = "Keys of the organization", body = [ApiKeyResponse]),
        (status = 403, description = "Missing api_keys:manage", body = ErrorResponse)
    ),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn list_api_keys(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let keys: Vec<ApiKeyResponse> = state
        .api_keys
        .list(&principal)
        .await?
        .into_iter()
        .map(ApiKeyResponse::from)
        .collect();
    Ok(Json(keys))
}

#[utoipa::path(
    delete,
    path = "/api-keys/{id}",
    params(("id" = Uuid, Path, description = "API key id")),
    responses(
        (status = 200, description = "Key revoked", body = ApiKeyResponse),
        (status = 403, description = "Forbidden", body = ErrorResponse),
        (status = 404, description = "Key not found", body = ErrorResponse)
    ),
    tag = "API Keys",
    security(("bearer_auth" = []))
)]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let key = state.api_keys.revoke(&principal, id).await?;
    Ok(Json(ApiKeyResponse::from(key)))
}
