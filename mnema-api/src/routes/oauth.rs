//! OAuth2 authorization server routes
//!
//! `/oauth/authorize` requires an authenticated session (the resource
//! owner's browser); `/oauth/token` and `/oauth/revoke` authenticate the
//! client per its registered method and speak the RFC 6749 wire format.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use base64::Engine as _;

use crate::audit_context;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthExtractor, AuthMethod};
use crate::oauth::{AuthorizeParams, RegisterClientRequest, RevokeParams, TokenParams};
use crate::state::AppState;

/// Parse an HTTP Basic authorization header into client credentials.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(raw).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /oauth/authorize - authorization-code issuance
pub async fn authorize(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, ApiError> {
    // The resource owner must be present in a browser session; bearer
    // credentials cannot consent on a user's behalf.
    if current.method != AuthMethod::Session {
        return Err(ApiError::forbidden(
            "authorization requires an interactive session",
        ));
    }

    match state.oauth.authorize(current.user.user_id, params).await {
        Ok(location) => Ok(Redirect::temporary(&location).into_response()),
        Err(wire) => Ok(wire.into_response()),
    }
}

/// POST /oauth/token - code exchange and refresh
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<TokenParams>,
) -> Response {
    let basic = basic_credentials(&headers);
    match state.oauth.token(params, basic).await {
        Ok(grant) => Json(grant).into_response(),
        Err(wire) => wire.into_response(),
    }
}

/// POST /oauth/revoke - RFC 7009 token revocation
pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<RevokeParams>,
) -> Response {
    let basic = basic_credentials(&headers);
    match state.oauth.revoke(params, basic).await {
        // RFC 7009: revocation responses are 200 even for unknown tokens.
        Ok(()) => Json(serde_json::json!({})).into_response(),
        Err(wire) => wire.into_response(),
    }
}

/// POST /oauth/clients - register a client (admin, audited)
pub async fn register_client(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    headers: HeaderMap,
    Json(req): Json<RegisterClientRequest>,
) -> ApiResult<impl IntoResponse> {
    if current.principal.role != mnema_core::Role::Admin {
        return Err(ApiError::forbidden("client registration is admin-only"));
    }

    let response = state.oauth.register_client(req).await?;

    state
        .engine
        .audit
        .record(
            current.user.user_id,
            &current.user.email,
            "oauth_client.register",
            &format!("oauth_clients/{}", response.client_id),
            None,
            Some(response.client_id.as_bytes()),
            &audit_context(&headers),
            None,
        )
        .await?;

    Ok(Json(response))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Client-facing endpoints (no principal required; clients authenticate
/// inside the protocol).
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/token", post(token))
        .route("/revoke", post(revoke))
}

/// Endpoints that require an authenticated principal.
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/authorize", get(authorize))
        .route("/clients", post(register_client))
}
