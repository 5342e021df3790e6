//! Mnema API - HTTP and MCP surface
//!
//! Axum application over the Mnema engine: identity & sessions against an
//! external IdP, a built-in OAuth2 authorization server with PKCE, hashed
//! API keys, role-based access control, the memory/graph/search REST
//! surface, and the MCP tool protocol.

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod oauth;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use auth::{ApiKeyStore, AuthConfig, IdpClient, SessionStore};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use oauth::{AuthorizationServer, OauthStore};
pub use routes::create_api_router;
pub use state::AppState;

use axum::http::HeaderMap;
use mnema_engine::RequestContext;

/// Build the audit request context from transport headers.
pub fn audit_context(headers: &HeaderMap) -> RequestContext {
    RequestContext {
        ip: headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .map(|raw| raw.split(',').next().unwrap_or(raw).trim().to_string()),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_context_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().expect("value"));
        headers.insert(
            axum::http::header::USER_AGENT,
            "mnema-cli/0.3".parse().expect("value"),
        );

        let ctx = audit_context(&headers);
        assert_eq!(ctx.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(ctx.user_agent.as_deref(), Some("mnema-cli/0.3"));
    }

    #[test]
    fn test_audit_context_empty_headers() {
        let ctx = audit_context(&HeaderMap::new());
        assert!(ctx.ip.is_none());
        assert!(ctx.user_agent.is_none());
    }
}
