//! Health routes
//!
//! Liveness plus readiness with per-backend status. The same probe runs at
//! startup: the server refuses traffic until every dependency reports
//! healthy.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use mnema_core::{HealthCheck, HealthReport};
use mnema_storage::{CacheBackend as _, MemoryBackend as _, VectorIndex as _};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HealthResponse {
    pub status: mnema_core::HealthStatus,
    pub uptime_secs: u64,
    pub checks: Vec<HealthCheck>,
}

/// Probe every backend.
pub async fn probe_backends(state: &AppState) -> HealthReport {
    let checks = vec![
        state.backend.health().await,
        state.vector.health().await,
        cache_check(state).await,
    ];
    HealthReport::from_checks(checks)
}

async fn cache_check(state: &AppState) -> HealthCheck {
    // The cache trait has no dedicated probe; a read of a reserved key
    // exercises the backend end to end.
    match state.cache.get_raw("health:probe").await {
        Ok(_) => HealthCheck::healthy("cache"),
        Err(e) => HealthCheck::unhealthy("cache", e.to_string()),
    }
}

/// GET /health - liveness + readiness
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "One or more backends down", body = HealthResponse),
    ),
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = probe_backends(&state).await;
    let status_code = if report.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: report.status,
            uptime_secs: state.start_time.elapsed().as_secs(),
            checks: report.checks,
        }),
    )
}

/// Create the health routes router.
pub fn create_router() -> Router<AppState> {
    Router::new().route("/", get(health))
}
