//! Read-through helper for the hot-memory cache
//!
//! A read hits the cache first; on miss the caller queries the backend and
//! populates. Mutations invalidate eagerly so the cache never serves a
//! deleted or stale row beyond its TTL.

use std::sync::Arc;
use std::time::Duration;

use mnema_core::{MemoryRecord, MnemaResult, UserId};

use super::keys::hot_memory_key;
use super::traits::{CacheBackend, CacheExt};

/// Hot-memory read-through cache over the shared cache backend.
#[derive(Clone)]
pub struct ReadThroughMemoryCache {
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl ReadThroughMemoryCache {
    pub fn new(cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Cached record for `(owner, agent, key)`, if present.
    pub async fn get(
        &self,
        owner: UserId,
        agent_name: &str,
        key: &str,
    ) -> MnemaResult<Option<MemoryRecord>> {
        self.cache
            .get_json(&hot_memory_key(owner, agent_name, key))
            .await
    }

    /// Populate the cache after a backend read or write.
    pub async fn populate(&self, record: &MemoryRecord) -> MnemaResult<()> {
        self.cache
            .put_json(
                &hot_memory_key(record.owner_user_id, &record.agent_name, &record.key),
                record,
                Some(self.ttl),
            )
            .await
    }

    /// Drop the cached row for `(owner, agent, key)`.
    pub async fn invalidate(
        &self,
        owner: UserId,
        agent_name: &str,
        key: &str,
    ) -> MnemaResult<()> {
        self.cache
            .delete(&hot_memory_key(owner, agent_name, key))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use chrono::Utc;
    use mnema_core::{EntityIdType, MemoryId, MemoryKind, MemoryScope};

    fn record(owner: UserId) -> MemoryRecord {
        let now = Utc::now();
        MemoryRecord {
            memory_id: MemoryId::now_v7(),
            owner_user_id: owner,
            agent_name: "default".to_string(),
            key: "pref_lang".to_string(),
            value: "Rust".to_string(),
            scope: MemoryScope::Persistent,
            kind: MemoryKind::Normal,
            importance: 0.5,
            tags: vec![],
            metadata: None,
            has_embedding: false,
            needs_reindex: false,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
        }
    }

    #[tokio::test]
    async fn test_populate_then_get_then_invalidate() {
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());
        let hot = ReadThroughMemoryCache::new(cache, Duration::from_secs(60));
        let owner = UserId::now_v7();
        let rec = record(owner);

        assert!(hot
            .get(owner, "default", "pref_lang")
            .await
            .expect("get")
            .is_none());

        hot.populate(&rec).await.expect("populate");
        let cached = hot
            .get(owner, "default", "pref_lang")
            .await
            .expect("get")
            .expect("cached");
        assert_eq!(cached.value, "Rust");

        hot.invalidate(owner, "default", "pref_lang")
            .await
            .expect("invalidate");
        assert!(hot
            .get(owner, "default", "pref_lang")
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn test_owner_isolation_in_keys() {
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());
        let hot = ReadThroughMemoryCache::new(cache, Duration::from_secs(60));
        let owner_a = UserId::now_v7();
        let owner_b = UserId::now_v7();

        hot.populate(&record(owner_a)).await.expect("populate");
        assert!(hot
            .get(owner_b, "default", "pref_lang")
            .await
            .expect("get")
            .is_none());
    }
}
