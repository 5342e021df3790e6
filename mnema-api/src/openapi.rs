//! OpenAPI document assembly

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes;

/// The aggregated OpenAPI description served at `/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mnema API",
        description = "Universal AI memory platform: memories, hybrid retrieval, knowledge graph, and tool dispatch",
    ),
    paths(
        routes::health::health,
        routes::auth::me,
        routes::memory::put_memory,
        routes::memory::get_memory,
        routes::memory::search_memories,
        routes::memory::memory_stats,
        routes::api_keys::list_keys,
        routes::api_keys::create_key,
        routes::api_keys::revoke_key,
        routes::external_keys::list_secrets,
        routes::external_keys::upsert_secret,
        routes::external_keys::put_secret,
        routes::users::set_role,
        routes::mcp::list_tools,
        routes::mcp::call_tool,
    ),
    components(schemas(
        ApiError,
        ErrorCode,
        mnema_core::MemoryRecord,
        mnema_core::MemoryScope,
        mnema_core::MemoryKind,
        mnema_core::MemoryStats,
        mnema_core::SearchMode,
        mnema_core::SourceOrigin,
        mnema_core::Role,
        mnema_core::User,
        mnema_core::GraphNode,
        mnema_core::GraphEdge,
        mnema_core::HealthStatus,
        mnema_core::HealthCheck,
        routes::memory::PutMemoryRequest,
        routes::memory::MemoryWriteResponse,
        routes::memory::UpdateMemoryRequest,
        routes::memory::SearchRequest,
        routes::memory::SearchResponse,
        routes::api_keys::ApiKeyResponse,
        routes::api_keys::CreateApiKeyRequest,
        routes::api_keys::CreateApiKeyResponse,
        routes::external_keys::ExternalSecretResponse,
        routes::external_keys::UpsertSecretRequest,
        routes::external_keys::PutSecretRequest,
        routes::users::SetRoleRequest,
        routes::auth::MeResponse,
        routes::mcp::ListToolsResponse,
        routes::mcp::CallToolRequest,
        routes::mcp::CallToolResponse,
        routes::health::HealthResponse,
    ))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_builds() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).expect("serializable");
        assert!(json.contains("/memory/search"));
        assert!(json.contains("/mcp/call"));
    }
}
