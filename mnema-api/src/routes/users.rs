//! User administration and audit routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use mnema_core::{Role, User, UserId};
use serde::Deserialize;

use crate::audit_context;
use crate::error::ApiResult;
use crate::middleware::AuthExtractor;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SetRoleRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditListParams {
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

/// GET /users - list users (admin)
pub async fn list_users(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
) -> ApiResult<impl IntoResponse> {
    if current.principal.role != Role::Admin {
        return Err(crate::error::ApiError::forbidden("admin only"));
    }
    let users = state.engine.users.list().await?;
    Ok(Json(users))
}

/// PUT /users/{id}/role - change a user's role (admin, audited)
#[utoipa::path(
    put,
    path = "/users/{id}/role",
    tag = "Users",
    request_body = SetRoleRequest,
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Updated user", body = User),
        (status = 403, description = "Admin only", body = crate::error::ApiError),
    ),
)]
pub async fn set_role(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    headers: axum::http::HeaderMap,
    Path(id): Path<UserId>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let (old_role, user) = state
        .engine
        .users
        .set_role(current.principal, id, req.role)
        .await?;

    state
        .engine
        .audit
        .record(
            current.user.user_id,
            &current.user.email,
            "user.role_change",
            &format!("users/{}", user.user_id),
            Some(old_role.to_string().as_bytes()),
            Some(user.role.to_string().as_bytes()),
            &audit_context(&headers),
            None,
        )
        .await?;

    Ok(Json(user))
}

/// GET /audit - list audit events (admin), newest first
pub async fn list_audit(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Query(params): Query<AuditListParams>,
) -> ApiResult<impl IntoResponse> {
    let events = state
        .engine
        .audit
        .list(
            current.principal,
            params.limit.unwrap_or(100),
            params.offset,
        )
        .await?;
    Ok(Json(events))
}

/// Create the user-administration routes router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/:id/role", put(set_role))
}

/// Create the audit routes router.
pub fn audit_router() -> Router<AppState> {
    Router::new().route("/", get(list_audit))
}
