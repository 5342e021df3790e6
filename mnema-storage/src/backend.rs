//! Async relational backend trait
//!
//! Rows are JSON objects keyed by UUID within named logical tables. Both
//! implementations expose identical semantics; the embedded variant
//! serializes write transactions, the networked variant supports concurrent
//! transactions and surfaces conflicts as `StorageError::Retryable`.

use async_trait::async_trait;
use mnema_core::{FilterExpr, HealthCheck, MnemaResult, OrderBy};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Logical table names shared by all backends.
pub mod tables {
    pub const USERS: &str = "users";
    pub const MEMORIES: &str = "memories";
    pub const GRAPH_NODES: &str = "graph_nodes";
    pub const GRAPH_EDGES: &str = "graph_edges";
    pub const API_KEYS: &str = "api_keys";
    pub const OAUTH_CLIENTS: &str = "oauth_clients";
    pub const OAUTH_AUTHORIZATION_CODES: &str = "oauth_authorization_codes";
    pub const OAUTH_TOKENS: &str = "oauth_tokens";
    pub const EXTERNAL_API_KEYS: &str = "external_api_keys";
    pub const AUDIT_LOGS: &str = "audit_logs";

    /// All tables, in migration order.
    pub const ALL: &[&str] = &[
        USERS,
        MEMORIES,
        GRAPH_NODES,
        GRAPH_EDGES,
        API_KEYS,
        OAUTH_CLIENTS,
        OAUTH_AUTHORIZATION_CODES,
        OAUTH_TOKENS,
        EXTERNAL_API_KEYS,
        AUDIT_LOGS,
    ];
}

/// Declarative query over one table.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub predicate: Option<FilterExpr>,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn filtered(predicate: FilterExpr) -> Self {
        Self {
            predicate: Some(predicate),
            ..Default::default()
        }
    }

    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// One write inside a logical transaction batch.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put {
        table: String,
        id: Uuid,
        row: JsonValue,
    },
    Upsert {
        table: String,
        id: Uuid,
        row: JsonValue,
    },
    Delete {
        table: String,
        id: Uuid,
    },
}

impl WriteOp {
    pub fn put(table: &str, id: Uuid, row: JsonValue) -> Self {
        WriteOp::Put {
            table: table.to_string(),
            id,
            row,
        }
    }

    pub fn upsert(table: &str, id: Uuid, row: JsonValue) -> Self {
        WriteOp::Upsert {
            table: table.to_string(),
            id,
            row,
        }
    }

    pub fn delete(table: &str, id: Uuid) -> Self {
        WriteOp::Delete {
            table: table.to_string(),
            id,
        }
    }
}

/// Async relational backend for durable records.
///
/// Error mapping contract:
/// - missing row on `get` is `Ok(None)`, never an error;
/// - unique violations surface as `StorageError::Conflict`;
/// - transient failures (deadlocks, serialization) surface as
///   `StorageError::Retryable` and are retried by the engine;
/// - a down backend surfaces as `StorageError::Unavailable`.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Insert a new row. Fails with `Conflict` if the id already exists.
    async fn put(&self, table: &str, id: Uuid, row: JsonValue) -> MnemaResult<()>;

    /// Insert or fully replace a row.
    async fn upsert(&self, table: &str, id: Uuid, row: JsonValue) -> MnemaResult<()>;

    /// Fetch a row by id.
    async fn get(&self, table: &str, id: Uuid) -> MnemaResult<Option<JsonValue>>;

    /// Delete a row by id. Returns whether a row existed. Idempotent.
    async fn delete(&self, table: &str, id: Uuid) -> MnemaResult<bool>;

    /// Query rows by predicate with ordering and paging.
    async fn query(&self, table: &str, query: &Query) -> MnemaResult<Vec<JsonValue>>;

    /// Count rows matching a predicate.
    async fn count(&self, table: &str, predicate: Option<&FilterExpr>) -> MnemaResult<u64>;

    /// Full-text candidates for `query_text` over the nominated text field,
    /// pre-filtered by `predicate`, scored by the backend and normalized to
    /// [0, 1], best first.
    async fn text_search(
        &self,
        table: &str,
        predicate: Option<&FilterExpr>,
        text_field: &str,
        query_text: &str,
        limit: usize,
    ) -> MnemaResult<Vec<(JsonValue, f64)>>;

    /// Apply a batch of writes as one logical transaction: either all ops
    /// are durable or none are.
    async fn apply_batch(&self, ops: Vec<WriteOp>) -> MnemaResult<()>;

    /// Insert the row only if the table is currently empty, atomically.
    /// Returns true when the row was inserted as the table's first row.
    ///
    /// This is the primitive behind first-user-admin bootstrap.
    async fn put_if_table_empty(
        &self,
        table: &str,
        id: Uuid,
        row: JsonValue,
    ) -> MnemaResult<bool>;

    /// Run migrations up to the given schema version. Idempotent.
    async fn migrate(&self, schema_version: i32) -> MnemaResult<()>;

    /// Probe backend liveness.
    async fn health(&self) -> HealthCheck;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_builder() {
        let q = Query::filtered(FilterExpr::eq("scope", json!("working")))
            .with_order(OrderBy::desc("updated_at"))
            .with_limit(10)
            .with_offset(20);
        assert!(q.predicate.is_some());
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, 20);
        assert!(q.order.as_ref().is_some_and(|o| o.descending));
    }

    #[test]
    fn test_all_tables_listed_once() {
        let mut seen = std::collections::HashSet::new();
        for table in tables::ALL {
            assert!(seen.insert(*table), "duplicate table {}", table);
        }
        assert_eq!(tables::ALL.len(), 10);
    }
}
