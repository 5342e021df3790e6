//! Authentication and authorization middleware
//!
//! Resolves one `CurrentUser` per request with the credential precedence
//! the platform defines: valid session cookie, then bearer OAuth2 access
//! token, then bearer API key (an `X-API-Key` header is accepted as an
//! equivalent of the bearer form). The resolved principal is injected into
//! request extensions for `AuthExtractor`.
//!
//! Cookie-authenticated state-changing requests must carry the session's
//! synchronizer token in `X-CSRF-Token`.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, Method},
    middleware::Next,
    response::Response,
};
use mnema_core::{Principal, User};
use mnema_engine::UserStore;

use crate::auth::api_keys::KEY_PREFIX;
use crate::auth::{ApiKeyStore, SessionStore, SESSION_COOKIE};
use crate::error::ApiError;
use crate::oauth::AuthorizationServer;

// ============================================================================
// RESOLVED IDENTITY
// ============================================================================

/// How the request authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Session,
    OauthToken,
    ApiKey,
}

/// The authenticated identity injected into request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub principal: Principal,
    pub method: AuthMethod,
}

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

/// Shared state for the authentication middleware.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub sessions: SessionStore,
    pub api_keys: Arc<ApiKeyStore>,
    pub oauth: Arc<AuthorizationServer>,
    pub users: Arc<UserStore>,
}

impl AuthMiddlewareState {
    async fn load_user(&self, user_id: mnema_core::UserId) -> Result<User, ApiError> {
        self.users
            .get(user_id)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::unauthorized("credential references an unknown user"))
    }
}

fn cookie_value(parts_cookies: Option<&str>, name: &str) -> Option<String> {
    let cookies = parts_cookies?;
    for pair in cookies.split(';') {
        let mut iter = pair.trim().splitn(2, '=');
        if iter.next() == Some(name) {
            return iter.next().map(str::to_string);
        }
    }
    None
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Resolve the request's principal and enforce CSRF for cookie flows.
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let cookie_header = request
        .headers()
        .get(axum::http::header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);
    let api_key_header = request
        .headers()
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);
    let csrf_header = request
        .headers()
        .get("x-csrf-token")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    // 1. Session cookie.
    if let Some(token) = cookie_value(cookie_header.as_deref(), SESSION_COOKIE) {
        if let Some(session) = state.sessions.get(&token).await.map_err(ApiError::from)? {
            let is_mutation = matches!(
                *request.method(),
                Method::POST | Method::PUT | Method::DELETE | Method::PATCH
            );
            if is_mutation && csrf_header.as_deref() != Some(session.csrf_token.as_str()) {
                return Err(ApiError::forbidden("missing or invalid CSRF token"));
            }

            let user = state.load_user(session.user_id).await?;
            let current = CurrentUser {
                principal: Principal::new(user.user_id, user.role),
                user,
                method: AuthMethod::Session,
            };
            request.extensions_mut().insert(current);
            return Ok(next.run(request).await);
        }
    }

    // 2. Bearer token: OAuth2 access token, or an API key by its prefix.
    if let Some(bearer) = bearer.as_deref() {
        if bearer.starts_with(KEY_PREFIX) {
            if let Some(owner) = state.api_keys.verify(bearer).await.map_err(ApiError::from)? {
                let user = state.load_user(owner).await?;
                let current = CurrentUser {
                    principal: Principal::new(user.user_id, user.role),
                    user,
                    method: AuthMethod::ApiKey,
                };
                request.extensions_mut().insert(current);
                return Ok(next.run(request).await);
            }
            return Err(ApiError::unauthorized("invalid API key"));
        }

        if let Some(token) = state
            .oauth
            .validate_access(bearer)
            .await
            .map_err(ApiError::from)?
        {
            let user = state.load_user(token.user_id).await?;
            let current = CurrentUser {
                principal: Principal::new(user.user_id, user.role),
                user,
                method: AuthMethod::OauthToken,
            };
            request.extensions_mut().insert(current);
            return Ok(next.run(request).await);
        }
        return Err(ApiError::invalid_token("unknown bearer token"));
    }

    // 3. X-API-Key header.
    if let Some(api_key) = api_key_header.as_deref() {
        if let Some(owner) = state
            .api_keys
            .verify(api_key)
            .await
            .map_err(ApiError::from)?
        {
            let user = state.load_user(owner).await?;
            let current = CurrentUser {
                principal: Principal::new(user.user_id, user.role),
                user,
                method: AuthMethod::ApiKey,
            };
            request.extensions_mut().insert(current);
            return Ok(next.run(request).await);
        }
        return Err(ApiError::unauthorized("invalid API key"));
    }

    Err(ApiError::unauthorized(
        "authentication required: provide a session cookie, bearer token, or API key",
    ))
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Extractor that pulls the resolved identity out of request extensions.
///
/// ```ignore
/// async fn handler(AuthExtractor(current): AuthExtractor) -> ... {
///     let principal = current.principal;
/// }
/// ```
pub struct AuthExtractor(pub CurrentUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| ApiError::unauthorized("request was not authenticated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_parsing() {
        let header = "other=1; mnema_session=abc123; theme=dark";
        assert_eq!(
            cookie_value(Some(header), SESSION_COOKIE),
            Some("abc123".to_string())
        );
        assert_eq!(cookie_value(Some(header), "missing"), None);
        assert_eq!(cookie_value(None, SESSION_COOKIE), None);
    }
}
