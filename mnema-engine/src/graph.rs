//! Graph overlay
//!
//! Directed typed graph of entities and relations per owner, backed by the
//! nodes and edges tables. Traversal is breadth-first with a clamped depth,
//! honors edge temporal validity at query time, and accumulates path
//! weight. Cross-owner traversal is impossible by construction: every read
//! is owner-filtered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use mnema_core::{
    AccessError, EdgeId, EngineConfig, EntityIdType, FilterExpr, GraphEdge, GraphError,
    GraphNode, MemoryId, MnemaError, MnemaResult, NodeId, Principal, Role, Timestamp,
    TraversalDirection, UserId,
};
use mnema_storage::{backend::tables, MemoryBackend, Query};
use serde_json::json;

use crate::codec::{decode_row, encode_row};
use crate::locks::KeyLockMap;

/// Traversal request.
#[derive(Debug, Clone)]
pub struct GraphQuery {
    pub start_ids: Vec<NodeId>,
    /// Only follow edges with these relation types; empty = all.
    pub relation_types: Vec<String>,
    pub max_depth: u32,
    pub direction: TraversalDirection,
    /// Instant at which edge validity is evaluated; defaults to now.
    pub at: Option<Timestamp>,
    pub target_user: Option<UserId>,
}

/// One discovered path, in traversal order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<NodeId>,
    pub relations: Vec<String>,
    pub total_weight: f64,
    pub depth: u32,
}

/// One neighbor with the connecting edge.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NeighborEntry {
    pub node: GraphNode,
    pub edge: GraphEdge,
    pub outbound: bool,
}

/// Per-owner graph store.
pub struct GraphStore {
    backend: Arc<dyn MemoryBackend>,
    locks: KeyLockMap,
    config: EngineConfig,
}

impl GraphStore {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            locks: KeyLockMap::new(),
            config,
        }
    }

    fn require_writer(principal: Principal) -> MnemaResult<()> {
        if principal.role.at_least(Role::User) {
            Ok(())
        } else {
            Err(MnemaError::Access(AccessError::InsufficientRole {
                role: principal.role,
                required: Role::User,
            }))
        }
    }

    fn owner_filter(owner: UserId) -> FilterExpr {
        FilterExpr::eq("owner_user_id", json!(owner.to_string()))
    }

    async fn fetch_node(&self, owner: UserId, node_id: NodeId) -> MnemaResult<Option<GraphNode>> {
        let Some(row) = self
            .backend
            .get(tables::GRAPH_NODES, node_id.as_uuid())
            .await?
        else {
            return Ok(None);
        };
        let node: GraphNode = decode_row(tables::GRAPH_NODES, row)?;
        // Owner scoping on point reads.
        if node.owner_user_id != owner {
            return Ok(None);
        }
        Ok(Some(node))
    }

    /// Create a node. The node id may be supplied for idempotent imports.
    pub async fn add_node(
        &self,
        principal: Principal,
        node_id: Option<NodeId>,
        node_type: &str,
        attrs: Option<serde_json::Value>,
        memory_ref: Option<MemoryId>,
        target_user: Option<UserId>,
    ) -> MnemaResult<GraphNode> {
        Self::require_writer(principal)?;
        let owner = principal.effective_owner(target_user)?;
        if node_type.trim().is_empty() {
            return Err(MnemaError::Validation(
                mnema_core::ValidationError::RequiredFieldMissing {
                    field: "node_type".to_string(),
                },
            ));
        }

        let _permit = self.locks.acquire(&owner.to_string()).await;

        let node = GraphNode {
            node_id: node_id.unwrap_or_else(NodeId::now_v7),
            owner_user_id: owner,
            node_type: node_type.to_string(),
            memory_ref,
            attrs,
            created_at: Utc::now(),
        };
        self.backend
            .upsert(
                tables::GRAPH_NODES,
                node.node_id.as_uuid(),
                encode_row(tables::GRAPH_NODES, &node)?,
            )
            .await?;
        Ok(node)
    }

    /// Create a directed edge between two existing nodes of the same owner.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_edge(
        &self,
        principal: Principal,
        src: NodeId,
        dst: NodeId,
        relation_type: &str,
        weight: Option<f64>,
        valid_from: Option<Timestamp>,
        valid_until: Option<Timestamp>,
        attrs: Option<serde_json::Value>,
        target_user: Option<UserId>,
    ) -> MnemaResult<GraphEdge> {
        Self::require_writer(principal)?;
        let owner = principal.effective_owner(target_user)?;
        if relation_type.trim().is_empty() {
            return Err(MnemaError::Validation(
                mnema_core::ValidationError::RequiredFieldMissing {
                    field: "relation_type".to_string(),
                },
            ));
        }
        if let (Some(from), Some(until)) = (valid_from, valid_until) {
            if until <= from {
                return Err(MnemaError::Graph(GraphError::InvalidEdge {
                    reason: "valid_until must be after valid_from".to_string(),
                }));
            }
        }

        let _permit = self.locks.acquire(&owner.to_string()).await;

        // Both endpoints must exist and belong to the owner.
        for endpoint in [src, dst] {
            if self.fetch_node(owner, endpoint).await?.is_none() {
                return Err(MnemaError::Graph(GraphError::NodeNotFound {
                    node_id: endpoint,
                }));
            }
        }

        let edge = GraphEdge {
            edge_id: EdgeId::now_v7(),
            owner_user_id: owner,
            src,
            dst,
            relation_type: relation_type.to_string(),
            weight: weight.unwrap_or(1.0),
            valid_from,
            valid_until,
            attrs,
            created_at: Utc::now(),
        };
        self.backend
            .upsert(
                tables::GRAPH_EDGES,
                edge.edge_id.as_uuid(),
                encode_row(tables::GRAPH_EDGES, &edge)?,
            )
            .await?;
        Ok(edge)
    }

    /// All edges of one owner, materialized for traversal.
    async fn owner_edges(&self, owner: UserId) -> MnemaResult<Vec<GraphEdge>> {
        let rows = self
            .backend
            .query(tables::GRAPH_EDGES, &Query::filtered(Self::owner_filter(owner)))
            .await?;
        rows.into_iter()
            .map(|row| decode_row(tables::GRAPH_EDGES, row))
            .collect()
    }

    /// Immediate neighbors of a node.
    pub async fn neighbors(
        &self,
        principal: Principal,
        node_id: NodeId,
        relation_types: &[String],
        direction: TraversalDirection,
        target_user: Option<UserId>,
    ) -> MnemaResult<Vec<NeighborEntry>> {
        let owner = principal.effective_owner(target_user)?;
        if self.fetch_node(owner, node_id).await?.is_none() {
            return Err(MnemaError::Graph(GraphError::NodeNotFound { node_id }));
        }

        let now = Utc::now();
        let mut entries = Vec::new();
        for edge in self.owner_edges(owner).await? {
            if !edge.valid_at(now) {
                continue;
            }
            if !relation_types.is_empty() && !relation_types.contains(&edge.relation_type) {
                continue;
            }

            let (neighbor_id, outbound) = if edge.src == node_id
                && matches!(
                    direction,
                    TraversalDirection::Outbound | TraversalDirection::Both
                ) {
                (edge.dst, true)
            } else if edge.dst == node_id
                && matches!(
                    direction,
                    TraversalDirection::Inbound | TraversalDirection::Both
                )
            {
                (edge.src, false)
            } else {
                continue;
            };

            if let Some(node) = self.fetch_node(owner, neighbor_id).await? {
                entries.push(NeighborEntry {
                    node,
                    edge,
                    outbound,
                });
            }
        }
        Ok(entries)
    }

    /// Breadth-first traversal from the start set, returning the paths to
    /// every reached node. Depth is clamped, never rejected.
    pub async fn query(
        &self,
        principal: Principal,
        query: GraphQuery,
    ) -> MnemaResult<Vec<GraphPath>> {
        let owner = principal.effective_owner(query.target_user)?;
        let depth_cap = self.config.clamp_depth(query.max_depth);
        let at = query.at.unwrap_or_else(Utc::now);

        // Build the adjacency view once; traversal is pure compute after.
        let mut adjacency: HashMap<NodeId, Vec<&GraphEdge>> = HashMap::new();
        let edges = self.owner_edges(owner).await?;
        for edge in &edges {
            if !edge.valid_at(at) {
                continue;
            }
            if !query.relation_types.is_empty()
                && !query.relation_types.contains(&edge.relation_type)
            {
                continue;
            }
            if matches!(
                query.direction,
                TraversalDirection::Outbound | TraversalDirection::Both
            ) {
                adjacency.entry(edge.src).or_default().push(edge);
            }
            if matches!(
                query.direction,
                TraversalDirection::Inbound | TraversalDirection::Both
            ) {
                adjacency.entry(edge.dst).or_default().push(edge);
            }
        }

        let mut paths = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut frontier: VecDeque<GraphPath> = VecDeque::new();

        for start in &query.start_ids {
            if self.fetch_node(owner, *start).await?.is_none() {
                continue;
            }
            if visited.insert(*start) {
                frontier.push_back(GraphPath {
                    nodes: vec![*start],
                    relations: Vec::new(),
                    total_weight: 0.0,
                    depth: 0,
                });
            }
        }

        while let Some(path) = frontier.pop_front() {
            if path.depth > 0 {
                paths.push(path.clone());
            }
            if path.depth >= depth_cap {
                continue;
            }
            let current = *path.nodes.last().unwrap_or(&NodeId::nil());
            let Some(edges_out) = adjacency.get(&current) else {
                continue;
            };
            for edge in edges_out {
                let next = if edge.src == current { edge.dst } else { edge.src };
                if !visited.insert(next) {
                    continue;
                }
                let mut nodes = path.nodes.clone();
                nodes.push(next);
                let mut relations = path.relations.clone();
                relations.push(edge.relation_type.clone());
                frontier.push_back(GraphPath {
                    nodes,
                    relations,
                    total_weight: path.total_weight + edge.weight,
                    depth: path.depth + 1,
                });
            }
        }

        Ok(paths)
    }

    /// Remove a node and its incident edges.
    pub async fn remove_node(
        &self,
        principal: Principal,
        node_id: NodeId,
        target_user: Option<UserId>,
    ) -> MnemaResult<bool> {
        Self::require_writer(principal)?;
        let owner = principal.effective_owner(target_user)?;

        let _permit = self.locks.acquire(&owner.to_string()).await;

        if self.fetch_node(owner, node_id).await?.is_none() {
            return Ok(false);
        }

        for edge in self.owner_edges(owner).await? {
            if edge.src == node_id || edge.dst == node_id {
                self.backend
                    .delete(tables::GRAPH_EDGES, edge.edge_id.as_uuid())
                    .await?;
            }
        }
        self.backend
            .delete(tables::GRAPH_NODES, node_id.as_uuid())
            .await?;
        Ok(true)
    }

    /// Remove every edge `src -[relation_type]-> dst`.
    pub async fn remove_edge(
        &self,
        principal: Principal,
        src: NodeId,
        dst: NodeId,
        relation_type: &str,
        target_user: Option<UserId>,
    ) -> MnemaResult<bool> {
        Self::require_writer(principal)?;
        let owner = principal.effective_owner(target_user)?;

        let _permit = self.locks.acquire(&owner.to_string()).await;

        let mut removed = false;
        for edge in self.owner_edges(owner).await? {
            if edge.src == src && edge.dst == dst && edge.relation_type == relation_type {
                self.backend
                    .delete(tables::GRAPH_EDGES, edge.edge_id.as_uuid())
                    .await?;
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Fetch a node by id (owner-scoped).
    pub async fn get_node(
        &self,
        principal: Principal,
        node_id: NodeId,
        target_user: Option<UserId>,
    ) -> MnemaResult<Option<GraphNode>> {
        let owner = principal.effective_owner(target_user)?;
        self.fetch_node(owner, node_id).await
    }
}
