//! Embedded relational backend on LMDB
//!
//! Uses the heed crate (Rust bindings for LMDB) for a single-process,
//! file-backed store. One LMDB environment holds every logical table; keys
//! are `{table}/{uuid bytes}` so table scans are prefix scans. LMDB write
//! transactions are serialized and durable on commit, which is exactly the
//! embedded contract: writes are acknowledged only after they are durable.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use mnema_core::{FilterExpr, HealthCheck, MnemaError, MnemaResult, StorageError};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::backend::{MemoryBackend, Query, WriteOp};

/// Error type for embedded store operations.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddedStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EmbeddedStoreError> for MnemaError {
    fn from(e: EmbeddedStoreError) -> Self {
        MnemaError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

/// Key of the row storing the current schema version.
const SCHEMA_META_KEY: &[u8] = b"__meta/schema_version";

/// Embedded file-backed backend.
pub struct EmbeddedBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
}

impl EmbeddedBackend {
    /// Open (or create) the embedded store at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, EmbeddedStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| EmbeddedStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| EmbeddedStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    fn row_key(table: &str, id: Uuid) -> Vec<u8> {
        let mut key = Vec::with_capacity(table.len() + 1 + 16);
        key.extend_from_slice(table.as_bytes());
        key.push(b'/');
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn table_prefix(table: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(table.len() + 1);
        prefix.extend_from_slice(table.as_bytes());
        prefix.push(b'/');
        prefix
    }

    fn decode_row(table: &str, bytes: &[u8]) -> MnemaResult<JsonValue> {
        serde_json::from_slice(bytes).map_err(|e| {
            MnemaError::Storage(StorageError::Corrupt {
                table: table.to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Scan all rows of a table, applying the optional predicate.
    fn scan(&self, table: &str, predicate: Option<&FilterExpr>) -> MnemaResult<Vec<JsonValue>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;

        let prefix = Self::table_prefix(table);
        let mut rows = Vec::new();

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;

        for result in iter {
            let (key, value) =
                result.map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
            if key.len() < prefix.len() || &key[..prefix.len()] != prefix.as_slice() {
                continue;
            }
            let row = Self::decode_row(table, value)?;
            if predicate.map_or(true, |p| p.matches(&row)) {
                rows.push(row);
            }
        }

        Ok(rows)
    }

    fn write_op(
        &self,
        wtxn: &mut heed::RwTxn<'_>,
        op: &WriteOp,
    ) -> MnemaResult<()> {
        match op {
            WriteOp::Put { table, id, row } => {
                let key = Self::row_key(table, *id);
                let exists = self
                    .db
                    .get(wtxn, &key)
                    .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?
                    .is_some();
                if exists {
                    return Err(MnemaError::Storage(StorageError::Conflict {
                        table: table.to_string(),
                        reason: format!("row {} already exists", id),
                    }));
                }
                let bytes = serde_json::to_vec(row)
                    .map_err(|e| EmbeddedStoreError::Serialization(e.to_string()))?;
                self.db
                    .put(wtxn, &key, &bytes)
                    .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
            }
            WriteOp::Upsert { table, id, row } => {
                let key = Self::row_key(table, *id);
                let bytes = serde_json::to_vec(row)
                    .map_err(|e| EmbeddedStoreError::Serialization(e.to_string()))?;
                self.db
                    .put(wtxn, &key, &bytes)
                    .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
            }
            WriteOp::Delete { table, id } => {
                let key = Self::row_key(table, *id);
                self.db
                    .delete(wtxn, &key)
                    .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
            }
        }
        Ok(())
    }
}

/// Deterministic ordering over JSON field values: null < bool < number <
/// string. RFC 3339 timestamps sort correctly as strings.
fn cmp_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(v: Option<&JsonValue>) -> u8 {
        match v {
            None | Some(JsonValue::Null) => 0,
            Some(JsonValue::Bool(_)) => 1,
            Some(JsonValue::Number(_)) => 2,
            Some(JsonValue::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[async_trait]
impl MemoryBackend for EmbeddedBackend {
    async fn put(&self, table: &str, id: Uuid, row: JsonValue) -> MnemaResult<()> {
        self.apply_batch(vec![WriteOp::put(table, id, row)]).await
    }

    async fn upsert(&self, table: &str, id: Uuid, row: JsonValue) -> MnemaResult<()> {
        self.apply_batch(vec![WriteOp::upsert(table, id, row)]).await
    }

    async fn get(&self, table: &str, id: Uuid) -> MnemaResult<Option<JsonValue>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        let key = Self::row_key(table, id);
        let value = self
            .db
            .get(&rtxn, &key)
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        value.map(|v| Self::decode_row(table, v)).transpose()
    }

    async fn delete(&self, table: &str, id: Uuid) -> MnemaResult<bool> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        let key = Self::row_key(table, id);
        let existed = self
            .db
            .delete(&mut wtxn, &key)
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        Ok(existed)
    }

    async fn query(&self, table: &str, query: &Query) -> MnemaResult<Vec<JsonValue>> {
        let mut rows = self.scan(table, query.predicate.as_ref())?;

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let cmp = cmp_json(a.get(&order.field), b.get(&order.field));
                if order.descending {
                    cmp.reverse()
                } else {
                    cmp
                }
            });
        }

        let rows = rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(rows)
    }

    async fn count(&self, table: &str, predicate: Option<&FilterExpr>) -> MnemaResult<u64> {
        Ok(self.scan(table, predicate)?.len() as u64)
    }

    async fn text_search(
        &self,
        table: &str,
        predicate: Option<&FilterExpr>,
        text_field: &str,
        query_text: &str,
        limit: usize,
    ) -> MnemaResult<Vec<(JsonValue, f64)>> {
        let text_filter = FilterExpr::TextMatch {
            field: text_field.to_string(),
            query: query_text.to_string(),
        };

        let mut scored: Vec<(JsonValue, f64)> = self
            .scan(table, predicate)?
            .into_iter()
            .filter_map(|row| {
                let score = text_filter.text_score(&row);
                (score > 0.0).then_some((row, score))
            })
            .collect();

        // Score descending, then id ascending for a stable order.
        fn row_id(row: &JsonValue) -> Option<&JsonValue> {
            row.get("id").or_else(|| row.get("memory_id"))
        }
        scored.sort_by(|(ra, sa), (rb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| cmp_json(row_id(ra), row_id(rb)))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn apply_batch(&self, ops: Vec<WriteOp>) -> MnemaResult<()> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;

        for op in &ops {
            // Abort the whole transaction on the first failed op.
            if let Err(e) = self.write_op(&mut wtxn, op) {
                wtxn.abort();
                return Err(e);
            }
        }

        wtxn.commit()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    async fn put_if_table_empty(
        &self,
        table: &str,
        id: Uuid,
        row: JsonValue,
    ) -> MnemaResult<bool> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;

        let prefix = Self::table_prefix(table);
        let mut empty = true;
        {
            let iter = self
                .db
                .iter(&wtxn)
                .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
            for result in iter {
                let (key, _) =
                    result.map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
                if key.len() >= prefix.len() && &key[..prefix.len()] == prefix.as_slice() {
                    empty = false;
                    break;
                }
            }
        }

        if !empty {
            wtxn.abort();
            return Ok(false);
        }

        let key = Self::row_key(table, id);
        let bytes = serde_json::to_vec(&row)
            .map_err(|e| EmbeddedStoreError::Serialization(e.to_string()))?;
        self.db
            .put(&mut wtxn, &key, &bytes)
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        Ok(true)
    }

    async fn migrate(&self, schema_version: i32) -> MnemaResult<()> {
        // The embedded store is schemaless; migration records the version so
        // future format changes can detect older environments.
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        self.db
            .put(&mut wtxn, SCHEMA_META_KEY, schema_version.to_string().as_bytes())
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| EmbeddedStoreError::Transaction(e.to_string()))?;
        tracing::info!(schema_version, "embedded store migrated");
        Ok(())
    }

    async fn health(&self) -> HealthCheck {
        match self.env.read_txn() {
            Ok(_) => HealthCheck::healthy("storage:embedded"),
            Err(e) => HealthCheck::unhealthy("storage:embedded", e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tables;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_backend() -> (TempDir, EmbeddedBackend) {
        let dir = TempDir::new().expect("temp dir");
        let backend = EmbeddedBackend::new(dir.path(), 16).expect("open env");
        (dir, backend)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, backend) = open_backend();
        let id = Uuid::now_v7();
        let row = json!({"id": id.to_string(), "value": "Python"});

        backend
            .put(tables::MEMORIES, id, row.clone())
            .await
            .expect("put");
        let fetched = backend.get(tables::MEMORIES, id).await.expect("get");
        assert_eq!(fetched, Some(row));
    }

    #[tokio::test]
    async fn test_put_conflict_on_existing_id() {
        let (_dir, backend) = open_backend();
        let id = Uuid::now_v7();
        backend
            .put(tables::MEMORIES, id, json!({"v": 1}))
            .await
            .expect("first put");

        let err = backend
            .put(tables::MEMORIES, id, json!({"v": 2}))
            .await
            .expect_err("second put must conflict");
        assert!(matches!(
            err,
            MnemaError::Storage(StorageError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, backend) = open_backend();
        let id = Uuid::now_v7();
        backend
            .put(tables::MEMORIES, id, json!({"v": 1}))
            .await
            .expect("put");

        assert!(backend.delete(tables::MEMORIES, id).await.expect("delete"));
        assert!(!backend.delete(tables::MEMORIES, id).await.expect("delete"));
        assert_eq!(
            backend.get(tables::MEMORIES, id).await.expect("get"),
            None
        );
    }

    #[tokio::test]
    async fn test_query_with_predicate_and_order() {
        let (_dir, backend) = open_backend();
        for (i, importance) in [0.9, 0.1, 0.5].iter().enumerate() {
            let id = Uuid::now_v7();
            backend
                .put(
                    tables::MEMORIES,
                    id,
                    json!({
                        "id": id.to_string(),
                        "owner_user_id": "u1",
                        "key": format!("k{}", i),
                        "importance": importance,
                    }),
                )
                .await
                .expect("put");
        }

        let query = Query::filtered(FilterExpr::eq("owner_user_id", json!("u1")))
            .with_order(mnema_core::OrderBy::desc("importance"))
            .with_limit(2);
        let rows = backend.query(tables::MEMORIES, &query).await.expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["importance"], json!(0.9));
        assert_eq!(rows[1]["importance"], json!(0.5));
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let (_dir, backend) = open_backend();
        let id = Uuid::now_v7();
        backend
            .put(tables::MEMORIES, id, json!({"v": "memory"}))
            .await
            .expect("put");

        assert_eq!(backend.get(tables::USERS, id).await.expect("get"), None);
        assert_eq!(
            backend.count(tables::USERS, None).await.expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn test_text_search_scores_and_orders() {
        let (_dir, backend) = open_backend();
        let full = Uuid::now_v7();
        let partial = Uuid::now_v7();
        backend
            .put(
                tables::MEMORIES,
                full,
                json!({"id": full.to_string(), "value": "backend development in rust"}),
            )
            .await
            .expect("put");
        backend
            .put(
                tables::MEMORIES,
                partial,
                json!({"id": partial.to_string(), "value": "frontend development"}),
            )
            .await
            .expect("put");

        let hits = backend
            .text_search(tables::MEMORIES, None, "value", "backend development", 10)
            .await
            .expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0["id"], json!(full.to_string()));
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn test_batch_atomicity() {
        let (_dir, backend) = open_backend();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        backend
            .put(tables::MEMORIES, b, json!({"v": "exists"}))
            .await
            .expect("seed");

        // Second op conflicts; the first must not be applied.
        let err = backend
            .apply_batch(vec![
                WriteOp::upsert(tables::MEMORIES, a, json!({"v": "new"})),
                WriteOp::put(tables::MEMORIES, b, json!({"v": "conflict"})),
            ])
            .await
            .expect_err("batch must fail");
        assert!(matches!(
            err,
            MnemaError::Storage(StorageError::Conflict { .. })
        ));
        assert_eq!(backend.get(tables::MEMORIES, a).await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_put_if_table_empty_bootstrap() {
        let (_dir, backend) = open_backend();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();

        assert!(backend
            .put_if_table_empty(tables::USERS, first, json!({"role": "admin"}))
            .await
            .expect("first insert"));
        assert!(!backend
            .put_if_table_empty(tables::USERS, second, json!({"role": "admin"}))
            .await
            .expect("second insert"));
        assert_eq!(backend.count(tables::USERS, None).await.expect("count"), 1);
    }
}
