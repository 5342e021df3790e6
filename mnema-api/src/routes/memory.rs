//! Memory REST API Routes

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use mnema_core::{MemoryKind, MemoryRecord, MemoryScope, MemoryStats, SearchMode, UserId};
use mnema_engine::{ListFilter, PutRequest, SearchFilter, SearchQuery, UpdatePatch};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;
use crate::state::AppState;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PutMemoryRequest {
    pub key: String,
    pub value: String,
    #[serde(default = "default_agent")]
    pub agent_name: String,
    #[serde(default)]
    pub scope: MemoryScope,
    #[serde(default)]
    pub kind: MemoryKind,
    pub importance: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<serde_json::Value>,
    pub compute_embedding: Option<bool>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub target_user: Option<UserId>,
}

fn default_agent() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MemoryWriteResponse {
    pub memory: MemoryRecord,
    pub created: bool,
    /// True when the row is durable but the vector index is behind; the
    /// reconciler will repair it.
    pub needs_reindex: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateMemoryRequest {
    pub value: Option<String>,
    pub scope: Option<MemoryScope>,
    pub kind: Option<MemoryKind>,
    pub importance: Option<f64>,
    pub tags: Option<Vec<String>>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<serde_json::Value>,
}

/// Query parameters shared by the keyed memory endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryKeyParams {
    #[serde(default = "default_agent")]
    pub agent: String,
    pub target_user: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListMemoriesParams {
    pub agent: Option<String>,
    pub scope: Option<MemoryScope>,
    pub kind: Option<MemoryKind>,
    /// Comma-separated tags.
    pub tags: Option<String>,
    pub min_importance: Option<f64>,
    pub max_importance: Option<f64>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    pub target_user: Option<UserId>,
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SearchRequest {
    pub query: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default)]
    pub rerank: bool,
    #[serde(default)]
    pub mark_accessed: bool,
    /// Return only ids and previews instead of full records.
    #[serde(default)]
    pub preview_only: bool,
    pub agent_name: Option<String>,
    pub scope: Option<MemoryScope>,
    pub kind: Option<MemoryKind>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub min_importance: Option<f64>,
    pub max_importance: Option<f64>,
    pub tag_pattern: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub target_user: Option<UserId>,
}

fn default_k() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SearchResponseItem {
    pub memory: MemoryRecord,
    pub score: f64,
    pub origins: Vec<mnema_core::SourceOrigin>,
}

#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SearchResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<Object>))]
    pub results: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcParams {
    pub target_user: Option<UserId>,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /memory - create or overwrite a memory
#[utoipa::path(
    post,
    path = "/memory",
    tag = "Memory",
    request_body = PutMemoryRequest,
    responses(
        (status = 200, description = "Memory written", body = MemoryWriteResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
)]
pub async fn put_memory(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Json(req): Json<PutMemoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .memories
        .put(
            current.principal,
            PutRequest {
                agent_name: req.agent_name,
                key: req.key,
                value: req.value,
                scope: req.scope,
                kind: req.kind,
                importance: req.importance.unwrap_or(0.5),
                tags: req.tags,
                metadata: req.metadata,
                compute_embedding: req.compute_embedding,
                target_user: req.target_user,
            },
        )
        .await?;

    Ok(Json(MemoryWriteResponse {
        memory: outcome.record,
        created: outcome.created,
        needs_reindex: outcome.needs_reindex,
    }))
}

/// GET /memory - list memories
pub async fn list_memories(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Query(params): Query<ListMemoriesParams>,
) -> ApiResult<impl IntoResponse> {
    let tags = params
        .tags
        .map(|raw| {
            raw.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let records = state
        .engine
        .memories
        .list(
            current.principal,
            ListFilter {
                agent_name: params.agent,
                scope: params.scope,
                kind: params.kind,
                tags,
                min_importance: params.min_importance,
                max_importance: params.max_importance,
                target_user: params.target_user,
                limit: params.limit,
                offset: params.offset,
            },
        )
        .await?;
    Ok(Json(records))
}

/// GET /memory/{key} - fetch one memory (records the access)
#[utoipa::path(
    get,
    path = "/memory/{key}",
    tag = "Memory",
    params(
        ("key" = String, Path, description = "Memory key"),
        ("agent" = Option<String>, Query, description = "Agent name (default 'default')"),
    ),
    responses(
        (status = 200, description = "The memory", body = MemoryRecord),
        (status = 404, description = "Not found", body = ApiError),
    ),
)]
pub async fn get_memory(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Path(key): Path<String>,
    Query(params): Query<MemoryKeyParams>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .engine
        .memories
        .get(current.principal, &params.agent, &key, params.target_user)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("memory {} not found", key)))?;
    Ok(Json(record))
}

/// PUT /memory/{key} - partial update
pub async fn update_memory(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Path(key): Path<String>,
    Query(params): Query<MemoryKeyParams>,
    Json(req): Json<UpdateMemoryRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .memories
        .update(
            current.principal,
            &params.agent,
            &key,
            UpdatePatch {
                value: req.value,
                scope: req.scope,
                kind: req.kind,
                importance: req.importance,
                tags: req.tags,
                metadata: req.metadata,
            },
            params.target_user,
        )
        .await?;
    Ok(Json(MemoryWriteResponse {
        memory: outcome.record,
        created: outcome.created,
        needs_reindex: outcome.needs_reindex,
    }))
}

/// DELETE /memory/{key} - delete (idempotent)
pub async fn delete_memory(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Path(key): Path<String>,
    Query(params): Query<MemoryKeyParams>,
) -> ApiResult<impl IntoResponse> {
    let deleted = state
        .engine
        .memories
        .delete(current.principal, &params.agent, &key, params.target_user)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// POST /memory/search - hybrid retrieval
#[utoipa::path(
    post,
    path = "/memory/search",
    tag = "Memory",
    request_body = SearchRequest,
    responses(
        (status = 200, description = "Ranked results", body = SearchResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
    ),
)]
pub async fn search_memories(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Json(req): Json<SearchRequest>,
) -> ApiResult<impl IntoResponse> {
    let query = SearchQuery {
        query_text: req.query,
        filter: SearchFilter {
            agent_name: req.agent_name,
            scope: req.scope,
            kind: req.kind,
            tags: req.tags,
            min_importance: req.min_importance,
            max_importance: req.max_importance,
            tag_pattern: req.tag_pattern,
        },
        k: req.k,
        mode: req.mode,
        rerank: req.rerank,
        mark_accessed: req.mark_accessed,
        target_user: req.target_user,
    };

    if req.preview_only {
        let previews = state
            .engine
            .search
            .retrieve_ids(current.principal, query)
            .await?;
        let results = previews
            .into_iter()
            .map(|p| serde_json::to_value(p).map_err(ApiError::from))
            .collect::<ApiResult<Vec<_>>>()?;
        return Ok(Json(SearchResponse { results }));
    }

    let hits = state.engine.search.search(current.principal, query).await?;
    let results = hits
        .into_iter()
        .map(|r| {
            serde_json::to_value(SearchResponseItem {
                memory: r.record,
                score: r.score,
                origins: r.origins,
            })
            .map_err(ApiError::from)
        })
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(SearchResponse { results }))
}

/// GET /memory/stats - aggregate statistics
#[utoipa::path(
    get,
    path = "/memory/stats",
    tag = "Memory",
    responses(
        (status = 200, description = "Memory statistics", body = MemoryStats),
    ),
)]
pub async fn memory_stats(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Query(params): Query<GcParams>,
) -> ApiResult<impl IntoResponse> {
    let stats = state
        .engine
        .memories
        .stats(current.principal, params.target_user)
        .await?;
    Ok(Json(stats))
}

/// POST /memory/gc - evict idle working-scope memories (admin)
pub async fn run_gc(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Query(params): Query<GcParams>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .memories
        .gc(current.principal, params.target_user)
        .await?;
    Ok(Json(serde_json::json!({
        "scanned": outcome.scanned,
        "deleted": outcome.deleted,
    })))
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Create the memory routes router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", post(put_memory).get(list_memories))
        .route("/search", post(search_memories))
        .route("/stats", get(memory_stats))
        .route("/gc", post(run_gc))
        .route(
            "/:key",
            get(get_memory).put(update_memory).delete(delete_memory),
        )
}
