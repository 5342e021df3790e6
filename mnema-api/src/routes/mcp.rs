//! MCP tool-protocol surface
//!
//! Exposes the engine's tool registry over the remote protocol: initialize
//! handshake, tool listing, and tool calls. Only `remote_capable` tools are
//! visible here; dispatch enforces role and validates input against each
//! tool's JSON schema.

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use mnema_engine::ToolDescriptor;
use mnema_storage::CacheBackend as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ApiResult;
use crate::middleware::AuthExtractor;
use crate::state::AppState;

/// MCP protocol version we support.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// PROTOCOL TYPES
// ============================================================================

/// MCP Initialize request.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct InitializeRequest {
    /// Protocol version requested by client
    pub protocol_version: String,
    /// Client information
    pub client_info: ClientInfo,
}

/// Client information.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// MCP Initialize response.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct InitializeResponse {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// Server capabilities.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

/// Tools capability details.
#[derive(Debug, Clone, Default, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ToolsCapability {
    pub list_changed: bool,
}

/// Server information.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// List tools response.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ListToolsResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<Object>))]
    pub tools: Vec<ToolDescriptor>,
}

/// Tool call request.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CallToolRequest {
    /// Tool name
    #[serde(alias = "tool_name")]
    pub name: String,
    /// Tool input, validated against the tool's input schema
    #[serde(default, alias = "input")]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub arguments: JsonValue,
}

/// Tool call response.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CallToolResponse {
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub output: JsonValue,
    pub is_error: bool,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /mcp/initialize - protocol handshake
pub async fn initialize(Json(req): Json<InitializeRequest>) -> impl IntoResponse {
    tracing::info!(
        client_name = %req.client_info.name,
        client_version = %req.client_info.version,
        protocol_version = %req.protocol_version,
        "MCP session initialized"
    );

    Json(InitializeResponse {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability {
                list_changed: false,
            },
        },
        server_info: ServerInfo {
            name: "Mnema MCP Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    })
}

/// GET /mcp/tools - list remote-capable tools with their schemas
#[utoipa::path(
    get,
    path = "/mcp/tools",
    tag = "MCP",
    responses(
        (status = 200, description = "Visible tools", body = ListToolsResponse),
    ),
)]
pub async fn list_tools(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
) -> impl IntoResponse {
    Json(ListToolsResponse {
        tools: state
            .engine
            .tools
            .descriptors(current.principal.role, true),
    })
}

/// POST /mcp/call - execute a tool
#[utoipa::path(
    post,
    path = "/mcp/call",
    tag = "MCP",
    request_body = CallToolRequest,
    responses(
        (status = 200, description = "Tool execution result", body = CallToolResponse),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 404, description = "Tool not found", body = crate::error::ApiError),
    ),
)]
pub async fn call_tool(
    State(state): State<AppState>,
    AuthExtractor(current): AuthExtractor,
    Json(req): Json<CallToolRequest>,
) -> ApiResult<impl IntoResponse> {
    tracing::debug!(tool = %req.name, "MCP tool call");

    // Per-tool usage counter, best effort, rolling 30 days.
    let counter_key = format!(
        "tool:stats:{}:{}",
        req.name,
        chrono::Utc::now().date_naive().format("%Y-%m-%d")
    );
    if let Err(e) = state
        .cache
        .incr(&counter_key, Some(std::time::Duration::from_secs(30 * 24 * 3600)))
        .await
    {
        tracing::debug!(error = %e, "tool usage counter failed");
    }

    let result = state
        .engine
        .tools
        .dispatch(current.principal, &req.name, req.arguments, true)
        .await;

    match result {
        Ok(output) => Ok(Json(CallToolResponse {
            output,
            is_error: false,
        })),
        Err(e) => {
            let api_error: crate::error::ApiError = e.into();
            Ok(Json(CallToolResponse {
                output: serde_json::json!({
                    "error": api_error.code,
                    "message": api_error.message,
                }),
                is_error: true,
            }))
        }
    }
}

// ============================================================================
// ROUTER SETUP
// ============================================================================

/// Create the MCP routes router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/initialize", post(initialize))
        .route("/tools", get(list_tools))
        .route("/tools/list", get(list_tools))
        .route("/call", post(call_tool))
        .route("/tools/call", post(call_tool))
}
