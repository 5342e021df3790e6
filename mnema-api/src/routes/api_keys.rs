//! API Key REST Routes
//!
//! `POST /api-keys` returns the plaintext exactly once; listings expose
//! only the identification prefix.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use mnema_core::{ApiKeyId, ApiKeyRecord};
use serde::{Deserialize, Serialize};

use crate::audit_context;
use crate::error::ApiResult;
use crate::middleware::AuthExtractor;
use crate::state::AppState;

// ============================================================================
// WIRE TYPES
// ============================================================================

/// API key as exposed to clients; the stored hash never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiKeyResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub api_key_id: ApiKeyId,
    pub name: String,
    /// First characters of the plaintext for identification.
    pub key_prefix: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: DateTime<Utc>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_used_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub revoked_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<ApiKeyRecord> for ApiKeyResponse {
    fn from(record: ApiKeyRecord) -> Self {
        Self {
            api_key_id: record.api_key_id,
            name: record.name,
            key_prefix: record.key_prefix,
            created_at: record.created_at,
            last_used_at: record.last_used_at,
            revoked_at: record.revoked_at,
            expires_at: record.expires_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateApiKeyRequest {
    pub name: String,
    /// Optional expiry, in days from now.
    pub expires_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateApiKeyResponse {
    pub api_key: ApiKeyResponse,
    /// Full key; returned only here, never again.
    pub key: String,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api-keys - list own keys
#[utoipa::path(
    get,
    path = "/api-keys",
    tag = "ApiKeys",
    responses(
        (status = 200, description = "The principal's API keys", body = [ApiKeyResponse]),
    ),
)]
pub async fn list_keys(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    let keys = state.api_keys.list(current.principal).await?;
    let responses: Vec<ApiKeyResponse> = keys.into_iter().map(ApiKeyResponse::from).collect();
    Ok(Json(responses))
}

/// POST /api-keys - create a key; plaintext returned exactly once
#[utoipa::path(
    post,
    path = "/api-keys",
    tag = "ApiKeys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 200, description = "Created key with one-time plaintext", body = CreateApiKeyResponse),
    ),
)]
pub async fn create_key(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    headers: axum::http::HeaderMap,
    Json(req): Json<CreateApiKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    let (plaintext, record) = state
        .api_keys
        .create(current.principal, &req.name, req.expires_days)
        .await?;

    state
        .engine
        .audit
        .record(
            current.user.user_id,
            &current.user.email,
            "api_key.create",
            &format!("api_keys/{}", record.api_key_id),
            None,
            Some(record.key_hash.as_bytes()),
            &audit_context(&headers),
            None,
        )
        .await?;

    Ok(Json(CreateApiKeyResponse {
        api_key: ApiKeyResponse::from(record),
        key: plaintext,
    }))
}

/// DELETE /api-keys/{id} - revoke
#[utoipa::path(
    delete,
    path = "/api-keys/{id}",
    tag = "ApiKeys",
    params(("id" = String, Path, description = "API key id")),
    responses(
        (status = 200, description = "Revoked key", body = ApiKeyResponse),
        (status = 404, description = "Not found", body = crate::error::ApiError),
    ),
)]
pub async fn revoke_key(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    headers: axum::http::HeaderMap,
    Path(id): Path<ApiKeyId>,
) -> ApiResult<impl IntoResponse> {
    let record = state.api_keys.revoke(current.principal, id).await?;

    state
        .engine
        .audit
        .record(
            current.user.user_id,
            &current.user.email,
            "api_key.revoke",
            &format!("api_keys/{}", record.api_key_id),
            Some(record.key_hash.as_bytes()),
            None,
            &audit_context(&headers),
            None,
        )
        .await?;

    Ok(Json(ApiKeyResponse::from(record)))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Create the API key routes router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_keys).post(create_key))
        .route("/:id", delete(revoke_key))
}
