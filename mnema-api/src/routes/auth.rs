//! Identity & session routes
//!
//! Login is delegated to the external IdP: `/auth/login` redirects to its
//! authorization endpoint with a state+nonce pair signed into a short-lived
//! cookie; `/auth/callback` exchanges the returned code, validates the id
//! token, provisions the user (first user ever becomes admin), and issues
//! an opaque session cookie. The CSRF synchronizer token is returned once
//! in the callback response.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use mnema_core::User;
use mnema_engine::users::NewUserProfile;
use serde::{Deserialize, Serialize};

use crate::auth::{generate_opaque_token, SESSION_COOKIE};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{AuthExtractor, AuthMethod};
use crate::state::AppState;

/// Cookie carrying the signed state+nonce between login and callback.
const OIDC_COOKIE: &str = "mnema_oidc";

/// Login-flow state lifetime in seconds.
const OIDC_STATE_TTL_SECS: i64 = 600;

// ============================================================================
// SIGNED LOGIN-FLOW STATE
// ============================================================================

/// Claims signed into the login-flow cookie.
#[derive(Debug, Serialize, Deserialize)]
struct LoginFlowClaims {
    state: String,
    nonce: String,
    iat: i64,
    exp: i64,
}

fn sign_login_flow(state: &AppState, claims: &LoginFlowClaims) -> ApiResult<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(state.auth_config.jwt_secret.expose().as_bytes()),
    )
    .map_err(|e| ApiError::internal_error(format!("failed to sign login state: {}", e)))
}

fn verify_login_flow(state: &AppState, token: &str) -> ApiResult<LoginFlowClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    decode::<LoginFlowClaims>(
        token,
        &DecodingKey::from_secret(state.auth_config.jwt_secret.expose().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::unauthorized("login flow state is invalid or expired"))
}

// ============================================================================
// COOKIE HELPERS
// ============================================================================

fn cookie_header(state: &AppState, name: &str, value: &str, max_age_secs: i64) -> String {
    let secure = if state.api_config.secure_cookies {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{}={}; HttpOnly{}; SameSite=Lax; Path=/; Max-Age={}",
        name, value, secure, max_age_secs
    )
}

fn clear_cookie_header(state: &AppState, name: &str) -> String {
    cookie_header(state, name, "", 0)
}

fn cookie_from_headers(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let mut iter = pair.trim().splitn(2, '=');
        if iter.next() == Some(name) {
            return iter.next().map(str::to_string);
        }
    }
    None
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LoginCompleteResponse {
    pub user: User,
    /// Synchronizer token for cookie-authenticated mutations; returned
    /// exactly once per session.
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MeResponse {
    pub user: User,
    pub auth_method: String,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /auth/login - start the IdP login flow
pub async fn login(State(state): State<AppState>) -> ApiResult<Response> {
    let Some(idp) = state.idp.as_ref() else {
        return Err(ApiError::dependency_unavailable(
            "SSO is not configured (OAUTH_CLIENT_ID unset)",
        ));
    };

    let now = chrono::Utc::now().timestamp();
    let claims = LoginFlowClaims {
        state: generate_opaque_token(),
        nonce: generate_opaque_token(),
        iat: now,
        exp: now + OIDC_STATE_TTL_SECS,
    };

    let url = idp.authorization_url(&claims.state, &claims.nonce).await?;
    let cookie = cookie_header(
        &state,
        OIDC_COOKIE,
        &sign_login_flow(&state, &claims)?,
        OIDC_STATE_TTL_SECS,
    );

    Ok((
        [(header::SET_COOKIE, cookie)],
        Redirect::temporary(&url),
    )
        .into_response())
}

/// GET /auth/callback - complete the IdP login flow
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Response> {
    let Some(idp) = state.idp.as_ref() else {
        return Err(ApiError::dependency_unavailable("SSO is not configured"));
    };

    if let Some(error) = params.error {
        return Err(ApiError::unauthorized(format!("IdP returned error: {}", error)));
    }
    let code = params
        .code
        .ok_or_else(|| ApiError::missing_field("code"))?;
    let returned_state = params
        .state
        .ok_or_else(|| ApiError::missing_field("state"))?;

    let flow_cookie = cookie_from_headers(&headers, OIDC_COOKIE)
        .ok_or_else(|| ApiError::unauthorized("login flow cookie missing"))?;
    let flow = verify_login_flow(&state, &flow_cookie)?;
    if flow.state != returned_state {
        return Err(ApiError::unauthorized("login flow state mismatch"));
    }

    // Exchange and validate: issuer, audience, signature, expiry, nonce.
    let claims = idp.exchange_code(&code, &flow.nonce).await?;

    let (user, created) = state
        .engine
        .users
        .provision(NewUserProfile {
            external_subject: claims.sub,
            email: claims.email.unwrap_or_default(),
            display_name: claims.name,
            avatar_url: claims.picture,
        })
        .await?;
    if created {
        tracing::info!(user_id = %user.user_id, role = %user.role, "user provisioned");
    }

    let (session_token, session) = state.sessions.create(user.user_id).await?;

    let session_cookie = cookie_header(
        &state,
        SESSION_COOKIE,
        &session_token,
        state.api_config.session_ttl.as_secs() as i64,
    );
    let clear_flow = clear_cookie_header(&state, OIDC_COOKIE);

    let mut response = (
        StatusCode::OK,
        Json(LoginCompleteResponse {
            user,
            csrf_token: session.csrf_token,
        }),
    )
        .into_response();
    response.headers_mut().append(
        header::SET_COOKIE,
        session_cookie
            .parse()
            .map_err(|_| ApiError::internal_error("invalid session cookie value"))?,
    );
    response.headers_mut().append(
        header::SET_COOKIE,
        clear_flow
            .parse()
            .map_err(|_| ApiError::internal_error("invalid cookie value"))?,
    );
    Ok(response)
}

/// GET /auth/me - the authenticated principal
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    responses(
        (status = 200, description = "Authenticated user", body = MeResponse),
        (status = 401, description = "Unauthenticated", body = ApiError),
    ),
)]
pub async fn me(AuthExtractor(current): AuthExtractor) -> ApiResult<impl IntoResponse> {
    let auth_method = match current.method {
        AuthMethod::Session => "session",
        AuthMethod::OauthToken => "oauth_token",
        AuthMethod::ApiKey => "api_key",
    };
    Ok(Json(MeResponse {
        user: current.user,
        auth_method: auth_method.to_string(),
    }))
}

/// POST /auth/logout - invalidate the session
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    AuthExtractor(current): AuthExtractor,
) -> ApiResult<Response> {
    if current.method != AuthMethod::Session {
        return Err(ApiError::invalid_input(
            "logout only applies to session credentials",
        ));
    }
    if let Some(token) = cookie_from_headers(&headers, SESSION_COOKIE) {
        state.sessions.delete(&token).await?;
    }

    let clear = clear_cookie_header(&state, SESSION_COOKIE);
    let mut response = Json(serde_json::json!({ "logged_out": true })).into_response();
    response.headers_mut().append(
        header::SET_COOKIE,
        clear
            .parse()
            .map_err(|_| ApiError::internal_error("invalid cookie value"))?,
    );
    Ok(response)
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Routes reachable without authentication.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
}

/// Routes behind the auth middleware.
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/logout", post(logout))
}
