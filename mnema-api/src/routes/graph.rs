//! Graph REST API Routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use mnema_core::{GraphEdge, GraphNode, MemoryId, NodeId, Timestamp, TraversalDirection, UserId};
use mnema_engine::GraphQuery;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::middleware::AuthExtractor;
use crate::state::AppState;

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AddNodeRequest {
    pub node_type: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub attrs: Option<serde_json::Value>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub memory_ref: Option<MemoryId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub target_user: Option<UserId>,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AddEdgeRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub src: NodeId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub dst: NodeId,
    pub relation_type: String,
    pub weight: Option<f64>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub valid_from: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub valid_until: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub attrs: Option<serde_json::Value>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub target_user: Option<UserId>,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TraverseRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub start_ids: Vec<NodeId>,
    #[serde(default)]
    pub relation_types: Vec<String>,
    #[serde(default = "default_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub direction: TraversalDirection,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub target_user: Option<UserId>,
}

fn default_depth() -> u32 {
    2
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NeighborParams {
    /// Comma-separated relation types; empty = all.
    pub relations: Option<String>,
    #[serde(default)]
    pub direction: Option<TraversalDirection>,
    pub target_user: Option<UserId>,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RemoveEdgeRequest {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub src: NodeId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub dst: NodeId,
    pub relation_type: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub target_user: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetParams {
    pub target_user: Option<UserId>,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /graph/nodes - create a node
#[utoipa::path(
    post,
    path = "/graph/nodes",
    tag = "Graph",
    request_body = AddNodeRequest,
    responses(
        (status = 200, description = "Created node", body = GraphNode),
    ),
)]
pub async fn add_node(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Json(req): Json<AddNodeRequest>,
) -> ApiResult<impl IntoResponse> {
    let node = state
        .engine
        .graph
        .add_node(
            current.principal,
            None,
            &req.node_type,
            req.attrs,
            req.memory_ref,
            req.target_user,
        )
        .await?;
    Ok(Json(node))
}

/// POST /graph/edges - create an edge
#[utoipa::path(
    post,
    path = "/graph/edges",
    tag = "Graph",
    request_body = AddEdgeRequest,
    responses(
        (status = 200, description = "Created edge", body = GraphEdge),
    ),
)]
pub async fn add_edge(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Json(req): Json<AddEdgeRequest>,
) -> ApiResult<impl IntoResponse> {
    let edge = state
        .engine
        .graph
        .add_edge(
            current.principal,
            req.src,
            req.dst,
            &req.relation_type,
            req.weight,
            req.valid_from,
            req.valid_until,
            req.attrs,
            req.target_user,
        )
        .await?;
    Ok(Json(edge))
}

/// POST /graph/query - BFS traversal
pub async fn traverse(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Json(req): Json<TraverseRequest>,
) -> ApiResult<impl IntoResponse> {
    let paths = state
        .engine
        .graph
        .query(
            current.principal,
            GraphQuery {
                start_ids: req.start_ids,
                relation_types: req.relation_types,
                max_depth: req.max_depth,
                direction: req.direction,
                at: req.at,
                target_user: req.target_user,
            },
        )
        .await?;
    Ok(Json(paths))
}

/// GET /graph/nodes/{id}/neighbors
pub async fn neighbors(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Path(node_id): Path<NodeId>,
    Query(params): Query<NeighborParams>,
) -> ApiResult<impl IntoResponse> {
    let relations: Vec<String> = params
        .relations
        .map(|raw| {
            raw.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let entries = state
        .engine
        .graph
        .neighbors(
            current.principal,
            node_id,
            &relations,
            params.direction.unwrap_or_default(),
            params.target_user,
        )
        .await?;
    Ok(Json(entries))
}

/// DELETE /graph/nodes/{id} - remove a node and incident edges
pub async fn remove_node(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Path(node_id): Path<NodeId>,
    Query(params): Query<TargetParams>,
) -> ApiResult<impl IntoResponse> {
    let removed = state
        .engine
        .graph
        .remove_node(current.principal, node_id, params.target_user)
        .await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

/// DELETE /graph/edges - remove edges matching (src, dst, relation_type)
pub async fn remove_edge(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Json(req): Json<RemoveEdgeRequest>,
) -> ApiResult<impl IntoResponse> {
    let removed = state
        .engine
        .graph
        .remove_edge(
            current.principal,
            req.src,
            req.dst,
            &req.relation_type,
            req.target_user,
        )
        .await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Create the graph routes router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/nodes", post(add_node))
        .route("/nodes/:id", delete(remove_node))
        .route("/nodes/:id/neighbors", get(neighbors))
        .route("/edges", post(add_edge).delete(remove_edge))
        .route("/query", post(traverse))
}
