//! REST API Routes Module
//!
//! Route handlers organized per surface, assembled into one application
//! router. Everything except `/health`, the login flow, and the OAuth2
//! client-facing endpoints sits behind the authentication middleware.

pub mod api_keys;
pub mod auth;
pub mod external_keys;
pub mod graph;
pub mod health;
pub mod mcp;
pub mod memory;
pub mod oauth;
pub mod users;

use axum::{middleware as axum_middleware, Router};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::middleware::{auth_middleware, AuthMiddlewareState};
use crate::state::AppState;

/// Create the complete application router.
pub fn create_api_router(state: AppState) -> Router {
    let auth_state = AuthMiddlewareState {
        sessions: state.sessions.clone(),
        api_keys: state.api_keys.clone(),
        oauth: state.oauth.clone(),
        users: state.engine.users.clone(),
    };

    let protected = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/oauth", oauth::protected_router())
        .nest("/memory", memory::create_router())
        .nest("/graph", graph::create_router())
        .nest("/api-keys", api_keys::create_router())
        .nest("/external-api-keys", external_keys::create_router())
        .nest("/users", users::create_router())
        .nest("/audit", users::audit_router())
        .nest("/mcp", mcp::create_router())
        .layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ));

    let public = Router::new()
        .nest("/health", health::create_router())
        .nest("/auth", auth::public_router())
        .nest("/oauth", oauth::public_router());

    let cors = if state.api_config.cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = state
            .api_config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let router = Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    #[cfg(feature = "openapi")]
    let router = router.route(
        "/openapi.json",
        axum::routing::get(|| async {
            axum::Json(<crate::openapi::ApiDoc as utoipa::OpenApi>::openapi())
        }),
    );

    router
}
