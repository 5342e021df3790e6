//! Tool registry and dispatch
//!
//! A tool is a named operation with a JSON input schema, an output schema,
//! a required role, and a `remote_capable` flag. The registry is populated
//! once at startup from a static table; dispatch is: look up by name,
//! enforce role, validate input against the schema, execute, serialize.
//! Remote surfaces only see `remote_capable` tools.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use jsonschema::Validator;
use mnema_core::{
    MemoryId, MemoryKind, MemoryScope, MnemaError, MnemaResult, NodeId, Principal, Role,
    SearchMode, Timestamp, TraversalDirection, UserId,
};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::graph::{GraphQuery, GraphStore};
use crate::memory::{ListFilter, MemoryStore, PutRequest, UpdatePatch};
use crate::search::{SearchEngine, SearchFilter, SearchQuery};

/// Boxed async tool handler.
pub type ToolHandler =
    Arc<dyn Fn(Principal, JsonValue) -> BoxFuture<'static, MnemaResult<JsonValue>> + Send + Sync>;

/// One registered tool.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: JsonValue,
    pub output_schema: JsonValue,
    pub required_role: Role,
    pub remote_capable: bool,
    pub handler: ToolHandler,
}

/// Schema-level description of a tool, as returned by `list_tools`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: JsonValue,
    pub output_schema: JsonValue,
    pub required_role: Role,
    pub remote_capable: bool,
}

/// Dispatch failure taxonomy, mapped by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Role {role} is insufficient for tool {name}, {required} required")]
    Forbidden {
        name: String,
        role: Role,
        required: Role,
    },

    #[error("Invalid input for tool {name}: {reason}")]
    InvalidInput { name: String, reason: String },

    #[error(transparent)]
    Engine(#[from] MnemaError),
}

struct RegisteredTool {
    spec: ToolSpec,
    validator: Validator,
}

/// Name-addressable tool registry.
pub struct ToolRegistry {
    tools: RwLock<HashMap<&'static str, Arc<RegisteredTool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a tool. The input schema is compiled once here; a schema
    /// that fails to compile is a startup bug and surfaces as an error.
    pub fn register(&self, spec: ToolSpec) -> MnemaResult<()> {
        let validator = jsonschema::validator_for(&spec.input_schema).map_err(|e| {
            MnemaError::Config(mnema_core::ConfigError::InvalidValue {
                field: "input_schema".to_string(),
                value: spec.name.to_string(),
                reason: e.to_string(),
            })
        })?;
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(spec.name, Arc::new(RegisteredTool { spec, validator }));
        Ok(())
    }

    /// Tools visible to a principal. `remote_only` hides tools that are not
    /// safe to call across the network.
    pub fn descriptors(&self, role: Role, remote_only: bool) -> Vec<ToolDescriptor> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<ToolDescriptor> = tools
            .values()
            .filter(|t| role.at_least(t.spec.required_role))
            .filter(|t| !remote_only || t.spec.remote_capable)
            .map(|t| ToolDescriptor {
                name: t.spec.name.to_string(),
                description: t.spec.description.to_string(),
                input_schema: t.spec.input_schema.clone(),
                output_schema: t.spec.output_schema.clone(),
                required_role: t.spec.required_role,
                remote_capable: t.spec.remote_capable,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Execute a tool by name.
    pub async fn dispatch(
        &self,
        principal: Principal,
        name: &str,
        input: JsonValue,
        remote: bool,
    ) -> Result<JsonValue, ToolError> {
        // list_tools is answered by the registry itself so the visible set
        // always matches what dispatch would accept.
        if name == "list_tools" {
            let descriptors = self.descriptors(principal.role, remote);
            return Ok(json!({ "tools": descriptors }));
        }

        let tool = {
            let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
            tools.get(name).cloned()
        }
        .ok_or_else(|| ToolError::NotFound {
            name: name.to_string(),
        })?;

        if remote && !tool.spec.remote_capable {
            return Err(ToolError::NotFound {
                name: name.to_string(),
            });
        }
        if !principal.role.at_least(tool.spec.required_role) {
            return Err(ToolError::Forbidden {
                name: name.to_string(),
                role: principal.role,
                required: tool.spec.required_role,
            });
        }
        if let Err(error) = tool.validator.validate(&input) {
            return Err(ToolError::InvalidInput {
                name: name.to_string(),
                reason: error.to_string(),
            });
        }

        let output = (tool.spec.handler)(principal, input).await?;
        Ok(output)
    }
}

// ============================================================================
// INPUT SHAPES
// ============================================================================

fn default_agent() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
struct MemoryPutInput {
    #[serde(default = "default_agent")]
    agent_name: String,
    key: String,
    value: String,
    #[serde(default)]
    scope: MemoryScope,
    #[serde(default)]
    kind: MemoryKind,
    importance: Option<f64>,
    #[serde(default)]
    tags: Vec<String>,
    metadata: Option<JsonValue>,
    compute_embedding: Option<bool>,
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct MemoryKeyInput {
    #[serde(default = "default_agent")]
    agent_name: String,
    key: String,
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct MemoryListInput {
    agent_name: Option<String>,
    scope: Option<MemoryScope>,
    kind: Option<MemoryKind>,
    #[serde(default)]
    tags: Vec<String>,
    min_importance: Option<f64>,
    max_importance: Option<f64>,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct MemoryUpdateInput {
    #[serde(default = "default_agent")]
    agent_name: String,
    key: String,
    value: Option<String>,
    scope: Option<MemoryScope>,
    kind: Option<MemoryKind>,
    importance: Option<f64>,
    tags: Option<Vec<String>>,
    metadata: Option<JsonValue>,
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct MemorySearchInput {
    query: Option<String>,
    #[serde(default = "default_k")]
    k: usize,
    #[serde(default)]
    mode: SearchMode,
    #[serde(default)]
    rerank: bool,
    #[serde(default)]
    mark_accessed: bool,
    #[serde(default)]
    preview_only: bool,
    agent_name: Option<String>,
    scope: Option<MemoryScope>,
    kind: Option<MemoryKind>,
    #[serde(default)]
    tags: Vec<String>,
    min_importance: Option<f64>,
    max_importance: Option<f64>,
    tag_pattern: Option<String>,
    target_user: Option<UserId>,
}

fn default_k() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct TargetUserInput {
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct GraphAddNodeInput {
    node_type: String,
    attrs: Option<JsonValue>,
    memory_ref: Option<MemoryId>,
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct GraphAddEdgeInput {
    src: NodeId,
    dst: NodeId,
    relation_type: String,
    weight: Option<f64>,
    valid_from: Option<Timestamp>,
    valid_until: Option<Timestamp>,
    attrs: Option<JsonValue>,
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct GraphNeighborsInput {
    node_id: NodeId,
    #[serde(default)]
    relation_types: Vec<String>,
    direction: Option<String>,
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct GraphQueryInput {
    start_ids: Vec<NodeId>,
    #[serde(default)]
    relation_types: Vec<String>,
    #[serde(default = "default_depth")]
    max_depth: u32,
    direction: Option<String>,
    target_user: Option<UserId>,
}

fn default_depth() -> u32 {
    2
}

#[derive(Debug, Deserialize)]
struct GraphRemoveNodeInput {
    node_id: NodeId,
    target_user: Option<UserId>,
}

#[derive(Debug, Deserialize)]
struct GraphRemoveEdgeInput {
    src: NodeId,
    dst: NodeId,
    relation_type: String,
    target_user: Option<UserId>,
}

fn parse_input<T: serde::de::DeserializeOwned>(name: &str, input: JsonValue) -> MnemaResult<T> {
    serde_json::from_value(input).map_err(|e| {
        MnemaError::Validation(mnema_core::ValidationError::InvalidValue {
            field: name.to_string(),
            reason: e.to_string(),
        })
    })
}

fn parse_direction(raw: Option<&str>) -> TraversalDirection {
    match raw {
        Some("inbound") => TraversalDirection::Inbound,
        Some("both") => TraversalDirection::Both,
        _ => TraversalDirection::Outbound,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> MnemaResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| {
        MnemaError::Validation(mnema_core::ValidationError::InvalidValue {
            field: "output".to_string(),
            reason: e.to_string(),
        })
    })
}

// ============================================================================
// STANDARD TOOL TABLE
// ============================================================================

/// Build the standard registry over the engine stores. Additional tools
/// (API-key listing, etc.) are registered by the API layer at startup.
pub fn standard_registry(
    memories: Arc<MemoryStore>,
    search: Arc<SearchEngine>,
    graph: Arc<GraphStore>,
) -> ToolRegistry {
    let registry = ToolRegistry::new();

    let memory_record_schema = json!({"type": "object"});
    let object_schema = json!({"type": "object"});

    // --- memory tools -------------------------------------------------------

    let store = memories.clone();
    register_or_log(&registry, ToolSpec {
        name: "memory_put",
        description: "Create or overwrite a memory addressed by (agent_name, key)",
        input_schema: json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string"},
                "key": {"type": "string"},
                "value": {"type": "string"},
                "scope": {"type": "string", "enum": ["working", "persistent"]},
                "kind": {"type": "string", "enum": ["normal", "coding"]},
                "importance": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "metadata": {"type": "object"},
                "compute_embedding": {"type": "boolean"},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["key", "value"]
        }),
        output_schema: memory_record_schema.clone(),
        required_role: Role::User,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let store = store.clone();
            Box::pin(async move {
                let parsed: MemoryPutInput = parse_input("memory_put", input)?;
                let outcome = store
                    .put(
                        principal,
                        PutRequest {
                            agent_name: parsed.agent_name,
                            key: parsed.key,
                            value: parsed.value,
                            scope: parsed.scope,
                            kind: parsed.kind,
                            importance: parsed.importance.unwrap_or(0.5),
                            tags: parsed.tags,
                            metadata: parsed.metadata,
                            compute_embedding: parsed.compute_embedding,
                            target_user: parsed.target_user,
                        },
                    )
                    .await?;
                Ok(json!({
                    "memory": to_json(&outcome.record)?,
                    "created": outcome.created,
                    "needs_reindex": outcome.needs_reindex,
                }))
            })
        }),
    });

    let store = memories.clone();
    register_or_log(&registry, ToolSpec {
        name: "memory_get",
        description: "Fetch one memory by key; records the access",
        input_schema: json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string"},
                "key": {"type": "string"},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["key"]
        }),
        output_schema: memory_record_schema.clone(),
        required_role: Role::ReadOnly,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let store = store.clone();
            Box::pin(async move {
                let parsed: MemoryKeyInput = parse_input("memory_get", input)?;
                let record = store
                    .get(principal, &parsed.agent_name, &parsed.key, parsed.target_user)
                    .await?;
                Ok(json!({ "memory": record.map(|r| to_json(&r)).transpose()? }))
            })
        }),
    });

    let store = memories.clone();
    register_or_log(&registry, ToolSpec {
        name: "memory_list",
        description: "Enumerate memories matching a filter",
        input_schema: json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string"},
                "scope": {"type": "string", "enum": ["working", "persistent"]},
                "kind": {"type": "string", "enum": ["normal", "coding"]},
                "tags": {"type": "array", "items": {"type": "string"}},
                "min_importance": {"type": "number"},
                "max_importance": {"type": "number"},
                "limit": {"type": "integer", "minimum": 0},
                "offset": {"type": "integer", "minimum": 0},
                "target_user": {"type": "string", "format": "uuid"}
            }
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"memories": {"type": "array"}}
        }),
        required_role: Role::ReadOnly,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let store = store.clone();
            Box::pin(async move {
                let parsed: MemoryListInput = parse_input("memory_list", input)?;
                let records = store
                    .list(
                        principal,
                        ListFilter {
                            agent_name: parsed.agent_name,
                            scope: parsed.scope,
                            kind: parsed.kind,
                            tags: parsed.tags,
                            min_importance: parsed.min_importance,
                            max_importance: parsed.max_importance,
                            target_user: parsed.target_user,
                            limit: parsed.limit,
                            offset: parsed.offset,
                        },
                    )
                    .await?;
                Ok(json!({ "memories": to_json(&records)? }))
            })
        }),
    });

    let store = memories.clone();
    register_or_log(&registry, ToolSpec {
        name: "memory_update",
        description: "Partially mutate a memory; re-embeds when the value changes",
        input_schema: json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string"},
                "key": {"type": "string"},
                "value": {"type": "string"},
                "scope": {"type": "string", "enum": ["working", "persistent"]},
                "kind": {"type": "string", "enum": ["normal", "coding"]},
                "importance": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "metadata": {"type": "object"},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["key"]
        }),
        output_schema: memory_record_schema.clone(),
        required_role: Role::User,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let store = store.clone();
            Box::pin(async move {
                let parsed: MemoryUpdateInput = parse_input("memory_update", input)?;
                let outcome = store
                    .update(
                        principal,
                        &parsed.agent_name,
                        &parsed.key,
                        UpdatePatch {
                            value: parsed.value,
                            scope: parsed.scope,
                            kind: parsed.kind,
                            importance: parsed.importance,
                            tags: parsed.tags,
                            metadata: parsed.metadata,
                        },
                        parsed.target_user,
                    )
                    .await?;
                Ok(json!({
                    "memory": to_json(&outcome.record)?,
                    "needs_reindex": outcome.needs_reindex,
                }))
            })
        }),
    });

    let store = memories.clone();
    register_or_log(&registry, ToolSpec {
        name: "memory_delete",
        description: "Delete a memory and its embedding; idempotent",
        input_schema: json!({
            "type": "object",
            "properties": {
                "agent_name": {"type": "string"},
                "key": {"type": "string"},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["key"]
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"deleted": {"type": "boolean"}}
        }),
        required_role: Role::User,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let store = store.clone();
            Box::pin(async move {
                let parsed: MemoryKeyInput = parse_input("memory_delete", input)?;
                let deleted = store
                    .delete(principal, &parsed.agent_name, &parsed.key, parsed.target_user)
                    .await?;
                Ok(json!({ "deleted": deleted }))
            })
        }),
    });

    let engine = search.clone();
    register_or_log(&registry, ToolSpec {
        name: "memory_search",
        description: "Hybrid lexical+vector retrieval over memories",
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "k": {"type": "integer", "minimum": 0},
                "mode": {"type": "string", "enum": ["vector", "lexical", "hybrid"]},
                "rerank": {"type": "boolean"},
                "mark_accessed": {"type": "boolean"},
                "preview_only": {"type": "boolean"},
                "agent_name": {"type": "string"},
                "scope": {"type": "string", "enum": ["working", "persistent"]},
                "kind": {"type": "string", "enum": ["normal", "coding"]},
                "tags": {"type": "array", "items": {"type": "string"}},
                "min_importance": {"type": "number"},
                "max_importance": {"type": "number"},
                "tag_pattern": {"type": "string"},
                "target_user": {"type": "string", "format": "uuid"}
            }
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"results": {"type": "array"}}
        }),
        required_role: Role::ReadOnly,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let engine = engine.clone();
            Box::pin(async move {
                let parsed: MemorySearchInput = parse_input("memory_search", input)?;
                let query = SearchQuery {
                    query_text: parsed.query,
                    filter: SearchFilter {
                        agent_name: parsed.agent_name,
                        scope: parsed.scope,
                        kind: parsed.kind,
                        tags: parsed.tags,
                        min_importance: parsed.min_importance,
                        max_importance: parsed.max_importance,
                        tag_pattern: parsed.tag_pattern,
                    },
                    k: parsed.k,
                    mode: parsed.mode,
                    rerank: parsed.rerank,
                    mark_accessed: parsed.mark_accessed,
                    target_user: parsed.target_user,
                };

                if parsed.preview_only {
                    let previews = engine.retrieve_ids(principal, query).await?;
                    return Ok(json!({ "results": to_json(&previews)? }));
                }

                let results = engine.search(principal, query).await?;
                let serialized: Vec<JsonValue> = results
                    .into_iter()
                    .map(|r| {
                        Ok(json!({
                            "memory": to_json(&r.record)?,
                            "score": r.score,
                            "origins": to_json(&r.origins)?,
                        }))
                    })
                    .collect::<MnemaResult<_>>()?;
                Ok(json!({ "results": serialized }))
            })
        }),
    });

    let store = memories.clone();
    register_or_log(&registry, ToolSpec {
        name: "memory_stats",
        description: "Aggregate statistics over the principal's memories",
        input_schema: json!({
            "type": "object",
            "properties": {
                "target_user": {"type": "string", "format": "uuid"}
            }
        }),
        output_schema: object_schema.clone(),
        required_role: Role::ReadOnly,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let store = store.clone();
            Box::pin(async move {
                let parsed: TargetUserInput = parse_input("memory_stats", input)?;
                let stats = store.stats(principal, parsed.target_user).await?;
                to_json(&stats)
            })
        }),
    });

    // --- graph tools --------------------------------------------------------

    let graph_store = graph.clone();
    register_or_log(&registry, ToolSpec {
        name: "graph_add_node",
        description: "Create a graph node, optionally referencing a memory",
        input_schema: json!({
            "type": "object",
            "properties": {
                "node_type": {"type": "string"},
                "attrs": {"type": "object"},
                "memory_ref": {"type": "string", "format": "uuid"},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["node_type"]
        }),
        output_schema: object_schema.clone(),
        required_role: Role::User,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let graph = graph_store.clone();
            Box::pin(async move {
                let parsed: GraphAddNodeInput = parse_input("graph_add_node", input)?;
                let node = graph
                    .add_node(
                        principal,
                        None,
                        &parsed.node_type,
                        parsed.attrs,
                        parsed.memory_ref,
                        parsed.target_user,
                    )
                    .await?;
                Ok(json!({ "node": to_json(&node)? }))
            })
        }),
    });

    let graph_store = graph.clone();
    register_or_log(&registry, ToolSpec {
        name: "graph_add_edge",
        description: "Create a directed typed edge between two nodes",
        input_schema: json!({
            "type": "object",
            "properties": {
                "src": {"type": "string", "format": "uuid"},
                "dst": {"type": "string", "format": "uuid"},
                "relation_type": {"type": "string"},
                "weight": {"type": "number"},
                "valid_from": {"type": "string", "format": "date-time"},
                "valid_until": {"type": "string", "format": "date-time"},
                "attrs": {"type": "object"},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["src", "dst", "relation_type"]
        }),
        output_schema: object_schema.clone(),
        required_role: Role::User,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let graph = graph_store.clone();
            Box::pin(async move {
                let parsed: GraphAddEdgeInput = parse_input("graph_add_edge", input)?;
                let edge = graph
                    .add_edge(
                        principal,
                        parsed.src,
                        parsed.dst,
                        &parsed.relation_type,
                        parsed.weight,
                        parsed.valid_from,
                        parsed.valid_until,
                        parsed.attrs,
                        parsed.target_user,
                    )
                    .await?;
                Ok(json!({ "edge": to_json(&edge)? }))
            })
        }),
    });

    let graph_store = graph.clone();
    register_or_log(&registry, ToolSpec {
        name: "graph_neighbors",
        description: "Immediate neighbors of a node with connecting edges",
        input_schema: json!({
            "type": "object",
            "properties": {
                "node_id": {"type": "string", "format": "uuid"},
                "relation_types": {"type": "array", "items": {"type": "string"}},
                "direction": {"type": "string", "enum": ["outbound", "inbound", "both"]},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["node_id"]
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"neighbors": {"type": "array"}}
        }),
        required_role: Role::ReadOnly,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let graph = graph_store.clone();
            Box::pin(async move {
                let parsed: GraphNeighborsInput = parse_input("graph_neighbors", input)?;
                let neighbors = graph
                    .neighbors(
                        principal,
                        parsed.node_id,
                        &parsed.relation_types,
                        parse_direction(parsed.direction.as_deref()),
                        parsed.target_user,
                    )
                    .await?;
                Ok(json!({ "neighbors": to_json(&neighbors)? }))
            })
        }),
    });

    let graph_store = graph.clone();
    register_or_log(&registry, ToolSpec {
        name: "graph_query",
        description: "Breadth-first traversal from a start set (depth capped)",
        input_schema: json!({
            "type": "object",
            "properties": {
                "start_ids": {"type": "array", "items": {"type": "string", "format": "uuid"}},
                "relation_types": {"type": "array", "items": {"type": "string"}},
                "max_depth": {"type": "integer", "minimum": 0},
                "direction": {"type": "string", "enum": ["outbound", "inbound", "both"]},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["start_ids"]
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"paths": {"type": "array"}}
        }),
        required_role: Role::ReadOnly,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let graph = graph_store.clone();
            Box::pin(async move {
                let parsed: GraphQueryInput = parse_input("graph_query", input)?;
                let paths = graph
                    .query(
                        principal,
                        GraphQuery {
                            start_ids: parsed.start_ids,
                            relation_types: parsed.relation_types,
                            max_depth: parsed.max_depth,
                            direction: parse_direction(parsed.direction.as_deref()),
                            at: None,
                            target_user: parsed.target_user,
                        },
                    )
                    .await?;
                Ok(json!({ "paths": to_json(&paths)? }))
            })
        }),
    });

    let graph_store = graph.clone();
    register_or_log(&registry, ToolSpec {
        name: "graph_remove_node",
        description: "Remove a node and its incident edges",
        input_schema: json!({
            "type": "object",
            "properties": {
                "node_id": {"type": "string", "format": "uuid"},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["node_id"]
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"removed": {"type": "boolean"}}
        }),
        required_role: Role::User,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let graph = graph_store.clone();
            Box::pin(async move {
                let parsed: GraphRemoveNodeInput = parse_input("graph_remove_node", input)?;
                let removed = graph
                    .remove_node(principal, parsed.node_id, parsed.target_user)
                    .await?;
                Ok(json!({ "removed": removed }))
            })
        }),
    });

    let graph_store = graph;
    register_or_log(&registry, ToolSpec {
        name: "graph_remove_edge",
        description: "Remove edges matching (src, dst, relation_type)",
        input_schema: json!({
            "type": "object",
            "properties": {
                "src": {"type": "string", "format": "uuid"},
                "dst": {"type": "string", "format": "uuid"},
                "relation_type": {"type": "string"},
                "target_user": {"type": "string", "format": "uuid"}
            },
            "required": ["src", "dst", "relation_type"]
        }),
        output_schema: json!({
            "type": "object",
            "properties": {"removed": {"type": "boolean"}}
        }),
        required_role: Role::User,
        remote_capable: true,
        handler: Arc::new(move |principal, input| {
            let graph = graph_store.clone();
            Box::pin(async move {
                let parsed: GraphRemoveEdgeInput = parse_input("graph_remove_edge", input)?;
                let removed = graph
                    .remove_edge(
                        principal,
                        parsed.src,
                        parsed.dst,
                        &parsed.relation_type,
                        parsed.target_user,
                    )
                    .await?;
                Ok(json!({ "removed": removed }))
            })
        }),
    });

    registry
}

/// Registration of the static table cannot fail unless a schema literal is
/// malformed; log loudly if it ever does.
fn register_or_log(registry: &ToolRegistry, spec: ToolSpec) {
    let name = spec.name;
    if let Err(e) = registry.register(spec) {
        tracing::error!(tool = name, error = %e, "failed to register tool");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnema_core::EntityIdType;

    #[test]
    fn test_descriptor_filtering_by_role() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolSpec {
                name: "admin_only",
                description: "for admins",
                input_schema: json!({"type": "object"}),
                output_schema: json!({"type": "object"}),
                required_role: Role::Admin,
                remote_capable: true,
                handler: Arc::new(|_, _| Box::pin(async { Ok(json!({})) })),
            })
            .expect("register");
        registry
            .register(ToolSpec {
                name: "read_tool",
                description: "for everyone",
                input_schema: json!({"type": "object"}),
                output_schema: json!({"type": "object"}),
                required_role: Role::ReadOnly,
                remote_capable: false,
                handler: Arc::new(|_, _| Box::pin(async { Ok(json!({})) })),
            })
            .expect("register");

        let read_only = registry.descriptors(Role::ReadOnly, false);
        assert_eq!(read_only.len(), 1);
        assert_eq!(read_only[0].name, "read_tool");

        let admin_all = registry.descriptors(Role::Admin, false);
        assert_eq!(admin_all.len(), 2);

        // Remote surface hides the non-remote tool.
        let admin_remote = registry.descriptors(Role::Admin, true);
        assert_eq!(admin_remote.len(), 1);
        assert_eq!(admin_remote[0].name, "admin_only");
    }

    #[tokio::test]
    async fn test_dispatch_validates_input() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolSpec {
                name: "echo",
                description: "echoes a message",
                input_schema: json!({
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }),
                output_schema: json!({"type": "object"}),
                required_role: Role::ReadOnly,
                remote_capable: true,
                handler: Arc::new(|_, input| {
                    Box::pin(async move { Ok(json!({"echo": input["message"]})) })
                }),
            })
            .expect("register");

        let principal = Principal::new(mnema_core::UserId::now_v7(), Role::User);

        let ok = registry
            .dispatch(principal, "echo", json!({"message": "hi"}), true)
            .await
            .expect("dispatch");
        assert_eq!(ok["echo"], json!("hi"));

        let err = registry
            .dispatch(principal, "echo", json!({"message": 7}), true)
            .await
            .expect_err("schema violation");
        assert!(matches!(err, ToolError::InvalidInput { .. }));

        let err = registry
            .dispatch(principal, "missing", json!({}), true)
            .await
            .expect_err("unknown tool");
        assert!(matches!(err, ToolError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_dispatch_enforces_role_and_remote_flag() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolSpec {
                name: "wipe",
                description: "destructive admin tool",
                input_schema: json!({"type": "object"}),
                output_schema: json!({"type": "object"}),
                required_role: Role::Admin,
                remote_capable: false,
                handler: Arc::new(|_, _| Box::pin(async { Ok(json!({"ok": true})) })),
            })
            .expect("register");

        let user = Principal::new(mnema_core::UserId::now_v7(), Role::User);
        let admin = Principal::new(mnema_core::UserId::now_v7(), Role::Admin);

        let err = registry
            .dispatch(user, "wipe", json!({}), false)
            .await
            .expect_err("role too low");
        assert!(matches!(err, ToolError::Forbidden { .. }));

        // Remote callers cannot see non-remote tools at all.
        let err = registry
            .dispatch(admin, "wipe", json!({}), true)
            .await
            .expect_err("not remote capable");
        assert!(matches!(err, ToolError::NotFound { .. }));

        let ok = registry
            .dispatch(admin, "wipe", json!({}), false)
            .await
            .expect("local admin dispatch");
        assert_eq!(ok["ok"], json!(true));
    }

    #[tokio::test]
    async fn test_list_tools_reflects_visibility() {
        let registry = ToolRegistry::new();
        registry
            .register(ToolSpec {
                name: "local_tool",
                description: "local only",
                input_schema: json!({"type": "object"}),
                output_schema: json!({"type": "object"}),
                required_role: Role::ReadOnly,
                remote_capable: false,
                handler: Arc::new(|_, _| Box::pin(async { Ok(json!({})) })),
            })
            .expect("register");

        let principal = Principal::new(mnema_core::UserId::now_v7(), Role::User);
        let remote_listing = registry
            .dispatch(principal, "list_tools", json!({}), true)
            .await
            .expect("list");
        assert_eq!(remote_listing["tools"], json!([]));

        let local_listing = registry
            .dispatch(principal, "list_tools", json!({}), false)
            .await
            .expect("list");
        assert_eq!(local_listing["tools"].as_array().map(Vec::len), Some(1));
    }
}
