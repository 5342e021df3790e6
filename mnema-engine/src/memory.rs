//! Memory store
//!
//! Principal-scoped CRUD over memory records. Invariants are enforced once
//! here: importance clamped, tags normalized, key/value sizes capped, and
//! unknown owners rejected. Writes to the same `(owner, agent, key)` are
//! serialized through the key lock map; the embedding upsert runs inline on
//! the write path so a subsequent read-your-writes search sees it. A vector
//! failure never loses the durable row: the record is flagged
//! `needs_reindex` and repaired by the reconciler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use mnema_core::{
    clamp_importance, normalize_tags, stamp_updated_at, validate_agent_name, validate_key,
    validate_value, AccessError, EngineConfig, EntityIdType, FilterExpr, MemoryId, MemoryKind,
    MemoryRecord, MemoryScope, MemoryStats, MnemaError, MnemaResult, OrderBy, Principal, Role,
    StorageError, UserId,
};
use mnema_llm::EmbeddingGateway;
use mnema_storage::{
    backend::tables, CacheBackend, CollectionRef, MemoryBackend, Query, ReadThroughMemoryCache,
    VectorIndex, VectorPoint,
};
use serde_json::json;

use crate::codec::{decode_row, encode_row};
use crate::locks::KeyLockMap;
use crate::users::UserStore;

/// Logical collection every memory embedding lives in, per owner.
pub const MEMORY_COLLECTION: &str = "memories";

/// Write request for `put`.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub agent_name: String,
    pub key: String,
    pub value: String,
    pub scope: MemoryScope,
    pub kind: MemoryKind,
    pub importance: f64,
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    /// None = default: embed persistent memories, skip working ones.
    pub compute_embedding: Option<bool>,
    /// Admin-only explicit owner override.
    pub target_user: Option<UserId>,
}

impl Default for PutRequest {
    fn default() -> Self {
        Self {
            agent_name: "default".to_string(),
            key: String::new(),
            value: String::new(),
            scope: MemoryScope::Persistent,
            kind: MemoryKind::Normal,
            importance: 0.5,
            tags: Vec::new(),
            metadata: None,
            compute_embedding: None,
            target_user: None,
        }
    }
}

/// Partial mutation for `update`.
#[derive(Debug, Clone, Default)]
pub struct UpdatePatch {
    pub value: Option<String>,
    pub scope: Option<MemoryScope>,
    pub kind: Option<MemoryKind>,
    pub importance: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
}

impl UpdatePatch {
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
            && self.scope.is_none()
            && self.kind.is_none()
            && self.importance.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
    }
}

/// Outcome of a write: the canonical record plus write flags.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub record: MemoryRecord,
    pub created: bool,
    /// True when the row is durable but the vector upsert failed; the
    /// reconciler will retry.
    pub needs_reindex: bool,
}

/// Listing filter for `list`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub agent_name: Option<String>,
    pub scope: Option<MemoryScope>,
    pub kind: Option<MemoryKind>,
    pub tags: Vec<String>,
    pub min_importance: Option<f64>,
    pub max_importance: Option<f64>,
    pub target_user: Option<UserId>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Outcome of a gc sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcOutcome {
    pub scanned: u64,
    pub deleted: u64,
}

/// Principal-scoped memory store.
pub struct MemoryStore {
    backend: Arc<dyn MemoryBackend>,
    vector: Arc<dyn VectorIndex>,
    gateway: Arc<EmbeddingGateway>,
    users: Arc<UserStore>,
    hot_cache: ReadThroughMemoryCache,
    locks: KeyLockMap,
    config: EngineConfig,
}

impl MemoryStore {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        vector: Arc<dyn VectorIndex>,
        cache: Arc<dyn CacheBackend>,
        gateway: Arc<EmbeddingGateway>,
        users: Arc<UserStore>,
        config: EngineConfig,
    ) -> Self {
        let hot_cache =
            ReadThroughMemoryCache::new(cache, Duration::from_secs(config.hot_cache_ttl_secs));
        Self {
            backend,
            vector,
            gateway,
            users,
            hot_cache,
            locks: KeyLockMap::new(),
            config,
        }
    }

    fn lock_key(owner: UserId, agent_name: &str, key: &str) -> String {
        format!("{}/{}/{}", owner, agent_name, key)
    }

    fn identity_filter(owner: UserId, agent_name: &str, key: &str) -> FilterExpr {
        FilterExpr::eq("owner_user_id", json!(owner.to_string()))
            .and(FilterExpr::eq("agent_name", json!(agent_name)))
            .and(FilterExpr::eq("key", json!(key)))
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

    /// Retry wrapper for transient backend failures (deadlocks and
    /// serialization conflicts on the networked backend).
    async fn with_retries<T, F, Fut>(&self, mut op: F) -> MnemaResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = MnemaResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(MnemaError::Storage(StorageError::Retryable { reason }))
                    if attempt < self.config.storage_retries =>
                {
                    attempt += 1;
                    tracing::debug!(attempt, %reason, "retrying storage operation");
                    tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                }
                other => return other,
            }
        }
    }

    async fn fetch_by_identity(
        &self,
        owner: UserId,
        agent_name: &str,
        key: &str,
    ) -> MnemaResult<Option<MemoryRecord>> {
        let query =
            Query::filtered(Self::identity_filter(owner, agent_name, key)).with_limit(1);
        let mut rows = self.backend.query(tables::MEMORIES, &query).await?;
        rows.pop()
            .map(|row| decode_row(tables::MEMORIES, row))
            .transpose()
    }

    async fn persist(&self, record: &MemoryRecord) -> MnemaResult<()> {
        let row = encode_row(tables::MEMORIES, record)?;
        self.with_retries(|| {
            let row = row.clone();
            async move {
                self.backend
                    .upsert(tables::MEMORIES, record.memory_id.as_uuid(), row)
                    .await
            }
        })
        .await
    }

    /// Embed the record's value and upsert it into the vector index.
    async fn index_record(&self, record: &MemoryRecord) -> MnemaResult<()> {
        let vector = self.gateway.embed(&record.value).await?;
        let collection = CollectionRef::new(record.owner_user_id, MEMORY_COLLECTION);
        self.vector
            .ensure_collection(&collection, self.gateway.dimensions())
            .await?;
        self.vector
            .upsert(
                &collection,
                VectorPoint {
                    id: record.memory_id.as_uuid(),
                    vector: vector.data,
                    attrs: record.index_attrs(),
                },
            )
            .await
    }

    /// Create or overwrite a memory. Returns the canonical record; when the
    /// vector upsert fails the row is still durable and the outcome carries
    /// `needs_reindex: true`.
    pub async fn put(&self, principal: Principal, req: PutRequest) -> MnemaResult<PutOutcome> {
        Self::require_writer(principal)?;
        let owner = principal.effective_owner(req.target_user)?;

        validate_agent_name(&req.agent_name)?;
        validate_key(&req.key)?;
        validate_value(&req.value)?;
        if !self.users.exists(owner).await? {
            return Err(MnemaError::Access(AccessError::UnknownOwner { owner }));
        }

        let tags = normalize_tags(&req.tags)?;
        let importance = clamp_importance(req.importance);
        let wants_embedding = req
            .compute_embedding
            .unwrap_or(req.scope == MemoryScope::Persistent);

        let _permit = self
            .locks
            .acquire(&Self::lock_key(owner, &req.agent_name, &req.key))
            .await;

        let now = Utc::now();
        let existing = self.fetch_by_identity(owner, &req.agent_name, &req.key).await?;
        let created = existing.is_none();

        let mut record = match existing {
            Some(prev) => MemoryRecord {
                value: req.value,
                scope: req.scope,
                kind: req.kind,
                importance,
                tags,
                metadata: req.metadata,
                has_embedding: wants_embedding,
                needs_reindex: false,
                updated_at: stamp_updated_at(prev.created_at, now),
                ..prev
            },
            None => MemoryRecord {
                memory_id: MemoryId::now_v7(),
                owner_user_id: owner,
                agent_name: req.agent_name.clone(),
                key: req.key.clone(),
                value: req.value,
                scope: req.scope,
                kind: req.kind,
                importance,
                tags,
                metadata: req.metadata,
                has_embedding: wants_embedding,
                needs_reindex: false,
                created_at: now,
                updated_at: now,
                last_accessed_at: now,
                access_count: 0,
            },
        };

        self.persist(&record).await?;

        let mut needs_reindex = false;
        if wants_embedding {
            if let Err(e) = self.index_record(&record).await {
                tracing::warn!(
                    memory_id = %record.memory_id,
                    error = %e,
                    "vector upsert failed; flagging for reconciliation"
                );
                record.needs_reindex = true;
                needs_reindex = true;
                self.persist(&record).await?;
            }
        }

        self.hot_cache.populate(&record).await.ok();
        Ok(PutOutcome {
            record,
            created,
            needs_reindex,
        })
    }

    /// Fetch one memory and record the access (count + timestamp). The
    /// bookkeeping write is best-effort.
    pub async fn get(
        &self,
        principal: Principal,
        agent_name: &str,
        key: &str,
        target_user: Option<UserId>,
    ) -> MnemaResult<Option<MemoryRecord>> {
        let owner = principal.effective_owner(target_user)?;

        let mut record = match self.hot_cache.get(owner, agent_name, key).await? {
            Some(cached) => cached,
            None => match self.fetch_by_identity(owner, agent_name, key).await? {
                Some(found) => found,
                None => return Ok(None),
            },
        };

        record.access_count += 1;
        record.last_accessed_at = Utc::now();

        // Access bookkeeping must not fail the read.
        if let Err(e) = self.persist(&record).await {
            tracing::debug!(memory_id = %record.memory_id, error = %e, "access bookkeeping failed");
        } else {
            self.hot_cache.populate(&record).await.ok();
        }

        Ok(Some(record))
    }

    /// Record an access for a search hit (used by mark-as-read retrieval).
    pub(crate) async fn mark_accessed(&self, record: &mut MemoryRecord) {
        record.access_count += 1;
        record.last_accessed_at = Utc::now();
        if let Err(e) = self.persist(record).await {
            tracing::debug!(memory_id = %record.memory_id, error = %e, "access bookkeeping failed");
        } else {
            self.hot_cache.populate(record).await.ok();
        }
    }

    /// Enumerate the principal's memories.
    pub async fn list(
        &self,
        principal: Principal,
        filter: ListFilter,
    ) -> MnemaResult<Vec<MemoryRecord>> {
        let owner = principal.effective_owner(filter.target_user)?;
        let mut predicate = FilterExpr::eq("owner_user_id", json!(owner.to_string()));

        if let Some(agent) = &filter.agent_name {
            predicate = predicate.and(FilterExpr::eq("agent_name", json!(agent)));
        }
        if let Some(scope) = filter.scope {
            predicate = predicate.and(FilterExpr::eq("scope", json!(scope)));
        }
        if let Some(kind) = filter.kind {
            predicate = predicate.and(FilterExpr::eq("kind", json!(kind)));
        }
        if !filter.tags.is_empty() {
            let tags = normalize_tags(&filter.tags)?;
            predicate = predicate.and(FilterExpr::tags_any("tags", tags));
        }
        if filter.min_importance.is_some() || filter.max_importance.is_some() {
            predicate = predicate.and(FilterExpr::range(
                "importance",
                filter.min_importance,
                filter.max_importance,
            ));
        }

        let query = Query::filtered(predicate)
            .with_order(OrderBy::desc("updated_at"))
            .with_limit(filter.limit.unwrap_or(100))
            .with_offset(filter.offset);

        let rows = self.backend.query(tables::MEMORIES, &query).await?;
        rows.into_iter()
            .map(|row| decode_row(tables::MEMORIES, row))
            .collect()
    }

    /// Partially mutate a memory; re-embeds when the value changes on an
    /// embedded record.
    pub async fn update(
        &self,
        principal: Principal,
        agent_name: &str,
        key: &str,
        patch: UpdatePatch,
        target_user: Option<UserId>,
    ) -> MnemaResult<PutOutcome> {
        Self::require_writer(principal)?;
        let owner = principal.effective_owner(target_user)?;

        let _permit = self
            .locks
            .acquire(&Self::lock_key(owner, agent_name, key))
            .await;

        let mut record = self
            .fetch_by_identity(owner, agent_name, key)
            .await?
            .ok_or_else(|| {
                MnemaError::Storage(StorageError::NotFound {
                    table: tables::MEMORIES.to_string(),
                    id: format!("{}/{}/{}", owner, agent_name, key),
                })
            })?;

        if let Some(value) = patch.value {
            validate_value(&value)?;
            record.value = value;
        }
        if let Some(scope) = patch.scope {
            record.scope = scope;
        }
        if let Some(kind) = patch.kind {
            record.kind = kind;
        }
        if let Some(importance) = patch.importance {
            record.importance = clamp_importance(importance);
        }
        if let Some(tags) = patch.tags {
            record.tags = normalize_tags(&tags)?;
        }
        if let Some(metadata) = patch.metadata {
            record.metadata = Some(metadata);
        }
        record.updated_at = stamp_updated_at(record.created_at, Utc::now());

        record.needs_reindex = false;
        self.persist(&record).await?;

        // An embedded record re-indexes after every patch: a changed value
        // needs a fresh vector, and attribute-only patches must refresh the
        // copied index attrs. Unchanged values hit the gateway cache.
        let mut needs_reindex = false;
        if record.has_embedding {
            if let Err(e) = self.index_record(&record).await {
                tracing::warn!(
                    memory_id = %record.memory_id,
                    error = %e,
                    "vector upsert failed; flagging for reconciliation"
                );
                record.needs_reindex = true;
                needs_reindex = true;
                self.persist(&record).await?;
            }
        }

        self.hot_cache.populate(&record).await.ok();
        Ok(PutOutcome {
            record,
            created: false,
            needs_reindex,
        })
    }

    /// Delete a memory. Idempotent; the vector entry is removed best-effort
    /// and graph nodes referencing the record have the reference cleared.
    pub async fn delete(
        &self,
        principal: Principal,
        agent_name: &str,
        key: &str,
        target_user: Option<UserId>,
    ) -> MnemaResult<bool> {
        Self::require_writer(principal)?;
        let owner = principal.effective_owner(target_user)?;

        let _permit = self
            .locks
            .acquire(&Self::lock_key(owner, agent_name, key))
            .await;

        let Some(record) = self.fetch_by_identity(owner, agent_name, key).await? else {
            return Ok(false);
        };

        self.backend
            .delete(tables::MEMORIES, record.memory_id.as_uuid())
            .await?;
        self.hot_cache.invalidate(owner, agent_name, key).await.ok();

        let collection = CollectionRef::new(owner, MEMORY_COLLECTION);
        if let Err(e) = self
            .vector
            .delete_point(&collection, record.memory_id.as_uuid())
            .await
        {
            tracing::debug!(memory_id = %record.memory_id, error = %e, "vector delete failed");
        }

        self.clear_graph_refs(owner, record.memory_id).await.ok();
        Ok(true)
    }

    /// Null out graph node references to a deleted memory. Nodes survive;
    /// the caller decides whether to remove them.
    async fn clear_graph_refs(&self, owner: UserId, memory_id: MemoryId) -> MnemaResult<()> {
        let predicate = FilterExpr::eq("owner_user_id", json!(owner.to_string())).and(
            FilterExpr::eq("memory_ref", json!(memory_id.to_string())),
        );
        let rows = self
            .backend
            .query(tables::GRAPH_NODES, &Query::filtered(predicate))
            .await?;
        for mut row in rows {
            if let Some(obj) = row.as_object_mut() {
                obj.insert("memory_ref".to_string(), serde_json::Value::Null);
            }
            if let Some(id) = row
                .get("node_id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<uuid::Uuid>().ok())
            {
                self.backend.upsert(tables::GRAPH_NODES, id, row).await?;
            }
        }
        Ok(())
    }

    /// Aggregate statistics over the principal's memories.
    pub async fn stats(
        &self,
        principal: Principal,
        target_user: Option<UserId>,
    ) -> MnemaResult<MemoryStats> {
        let owner = principal.effective_owner(target_user)?;
        let predicate = FilterExpr::eq("owner_user_id", json!(owner.to_string()));
        let rows = self
            .backend
            .query(tables::MEMORIES, &Query::filtered(predicate))
            .await?;

        let mut stats = MemoryStats::default();
        let mut importance_sum = 0.0;
        let mut agents = std::collections::HashSet::new();
        let mut tag_histogram: BTreeMap<String, u64> = BTreeMap::new();

        for row in rows {
            let record: MemoryRecord = decode_row(tables::MEMORIES, row)?;
            stats.total += 1;
            match record.scope {
                MemoryScope::Working => stats.working += 1,
                MemoryScope::Persistent => stats.persistent += 1,
            }
            stats.total_value_bytes += record.value.len() as u64;
            importance_sum += record.importance;
            agents.insert(record.agent_name);
            for tag in record.tags {
                *tag_histogram.entry(tag).or_insert(0) += 1;
            }
        }

        stats.average_importance = if stats.total > 0 {
            importance_sum / stats.total as f64
        } else {
            0.0
        };
        stats.distinct_agents = agents.len() as u64;
        stats.tag_histogram = tag_histogram;
        Ok(stats)
    }

    /// Evict working-scope memories idle past the horizon. Never touches
    /// persistent memories. Admin or scheduler only.
    pub async fn gc(&self, principal: Principal, target_user: Option<UserId>) -> MnemaResult<GcOutcome> {
        if principal.role != Role::Admin {
            return Err(MnemaError::Access(AccessError::InsufficientRole {
                role: principal.role,
                required: Role::Admin,
            }));
        }

        let horizon = Utc::now() - ChronoDuration::seconds(self.config.gc_horizon_secs);
        let mut predicate = FilterExpr::eq("scope", json!(MemoryScope::Working));
        if let Some(target) = target_user {
            predicate = predicate.and(FilterExpr::eq("owner_user_id", json!(target.to_string())));
        }

        let rows = self
            .backend
            .query(tables::MEMORIES, &Query::filtered(predicate))
            .await?;

        let mut outcome = GcOutcome::default();
        for row in rows {
            let record: MemoryRecord = decode_row(tables::MEMORIES, row)?;
            outcome.scanned += 1;
            if record.last_accessed_at >= horizon {
                continue;
            }

            self.backend
                .delete(tables::MEMORIES, record.memory_id.as_uuid())
                .await?;
            self.hot_cache
                .invalidate(record.owner_user_id, &record.agent_name, &record.key)
                .await
                .ok();
            let collection = CollectionRef::new(record.owner_user_id, MEMORY_COLLECTION);
            self.vector
                .delete_point(&collection, record.memory_id.as_uuid())
                .await
                .ok();
            outcome.deleted += 1;
        }

        tracing::info!(
            scanned = outcome.scanned,
            deleted = outcome.deleted,
            "memory gc sweep complete"
        );
        Ok(outcome)
    }

    /// Rows flagged for reconciliation, oldest first.
    pub(crate) async fn needs_reindex_batch(
        &self,
        limit: usize,
    ) -> MnemaResult<Vec<MemoryRecord>> {
        let query = Query::filtered(FilterExpr::eq("needs_reindex", json!(true)))
            .with_order(OrderBy::asc("updated_at"))
            .with_limit(limit);
        let rows = self.backend.query(tables::MEMORIES, &query).await?;
        rows.into_iter()
            .map(|row| decode_row(tables::MEMORIES, row))
            .collect()
    }

    /// Re-embed one flagged record; clears the flag on success.
    pub(crate) async fn reconcile_one(&self, record: &MemoryRecord) -> MnemaResult<()> {
        let _permit = self
            .locks
            .acquire(&Self::lock_key(
                record.owner_user_id,
                &record.agent_name,
                &record.key,
            ))
            .await;

        // Re-read under the lock; the record may have been deleted or
        // already repaired.
        let Some(mut current) = self
            .fetch_by_identity(record.owner_user_id, &record.agent_name, &record.key)
            .await?
        else {
            return Ok(());
        };
        if !current.needs_reindex {
            return Ok(());
        }

        self.index_record(&current).await?;
        current.needs_reindex = false;
        self.persist(&current).await?;
        self.hot_cache.populate(&current).await.ok();
        Ok(())
    }
}
