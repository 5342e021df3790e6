//! External provider credential routes (admin-only vault surface)
//!
//! Values are encrypted at rest; no endpoint ever returns a plaintext. All
//! mutations are audited with value hashes only.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use mnema_core::{ExternalSecret, SecretId, UserId};
use serde::{Deserialize, Serialize};

use crate::audit_context;
use crate::error::ApiResult;
use crate::middleware::AuthExtractor;
use crate::state::AppState;

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Vault entry metadata; ciphertext and plaintext never appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExternalSecretResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub secret_id: SecretId,
    pub key_name: String,
    pub provider_tag: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub updated_by: UserId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: DateTime<Utc>,
}

impl From<ExternalSecret> for ExternalSecretResponse {
    fn from(secret: ExternalSecret) -> Self {
        Self {
            secret_id: secret.secret_id,
            key_name: secret.key_name,
            provider_tag: secret.provider_tag,
            updated_by: secret.updated_by,
            updated_at: secret.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpsertSecretRequest {
    pub key_name: String,
    pub provider_tag: String,
    /// The credential value; encrypted before it touches storage.
    pub value: String,
}

/// Body for `PUT /external-api-keys/{key_name}`; the name comes from the
/// path.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PutSecretRequest {
    pub provider_tag: String,
    /// The credential value; encrypted before it touches storage.
    pub value: String,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /external-api-keys - list vault entries (admin)
#[utoipa::path(
    get,
    path = "/external-api-keys",
    tag = "Vault",
    responses(
        (status = 200, description = "Vault entries", body = [ExternalSecretResponse]),
        (status = 403, description = "Admin only", body = crate::error::ApiError),
    ),
)]
pub async fn list_secrets(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let secrets = state.engine.vault.list(current.principal).await?;
    let responses: Vec<ExternalSecretResponse> = secrets
        .into_iter()
        .map(ExternalSecretResponse::from)
        .collect();
    Ok(Json(responses))
}

/// POST /external-api-keys - create or update a vault entry (admin)
#[utoipa::path(
    post,
    path = "/external-api-keys",
    tag = "Vault",
    request_body = UpsertSecretRequest,
    responses(
        (status = 200, description = "Stored entry metadata", body = ExternalSecretResponse),
        (status = 403, description = "Admin only", body = crate::error::ApiError),
    ),
)]
pub async fn upsert_secret(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    headers: axum::http::HeaderMap,
    Json(req): Json<UpsertSecretRequest>,
) -> ApiResult<impl IntoResponse> {
    store_secret(
        &state,
        &current,
        &headers,
        &req.key_name,
        &req.provider_tag,
        &req.value,
    )
    .await
}

/// PUT /external-api-keys/{key_name} - update (or create) one entry (admin)
#[utoipa::path(
    put,
    path = "/external-api-keys/{key_name}",
    tag = "Vault",
    request_body = PutSecretRequest,
    params(("key_name" = String, Path, description = "Vault entry name")),
    responses(
        (status = 200, description = "Stored entry metadata", body = ExternalSecretResponse),
        (status = 403, description = "Admin only", body = crate::error::ApiError),
    ),
)]
pub async fn put_secret(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    headers: axum::http::HeaderMap,
    Path(key_name): Path<String>,
    Json(req): Json<PutSecretRequest>,
) -> ApiResult<impl IntoResponse> {
    store_secret(
        &state,
        &current,
        &headers,
        &key_name,
        &req.provider_tag,
        &req.value,
    )
    .await
}

/// Shared encrypted-write path behind POST and PUT; every write is audited
/// with a value hash only.
async fn store_secret(
    state: &AppState,
    current: &crate::middleware::CurrentUser,
    headers: &axum::http::HeaderMap,
    key_name: &str,
    provider_tag: &str,
    value: &str,
) -> ApiResult<Json<ExternalSecretResponse>> {
    let secret = state
        .engine
        .vault
        .set(
            current.principal,
            current.user.user_id,
            key_name,
            provider_tag,
            value,
        )
        .await?;

    state
        .engine
        .audit
        .record(
            current.user.user_id,
            &current.user.email,
            "external_secret.upsert",
            &format!("external_api_keys/{}", secret.key_name),
            None,
            Some(value.as_bytes()),
            &audit_context(headers),
            None,
        )
        .await?;

    Ok(Json(ExternalSecretResponse::from(secret)))
}

/// DELETE /external-api-keys/{key_name} - remove a vault entry (admin)
pub async fn delete_secret(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    headers: axum::http::HeaderMap,
    Path(key_name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state
        .engine
        .vault
        .delete(current.principal, &key_name)
        .await?;

    if deleted {
        state
            .engine
            .audit
            .record(
                current.user.user_id,
                &current.user.email,
                "external_secret.delete",
                &format!("external_api_keys/{}", key_name),
                None,
                None,
                &audit_context(&headers),
                None,
            )
            .await?;
    }

    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Create the vault routes router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_secrets).post(upsert_secret))
        .route("/:key_name", put(put_secret).delete(delete_secret))
}
