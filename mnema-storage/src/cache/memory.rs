//! In-process cache backend
//!
//! HashMap behind an RwLock with lazy expiry: expired entries are dropped
//! when touched, and a full sweep runs opportunistically once enough writes
//! have accumulated.

use async_trait::async_trait;
use mnema_core::MnemaResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::traits::{CacheBackend, CacheStats};

/// Number of writes between opportunistic full sweeps.
const SWEEP_EVERY_WRITES: u64 = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local cache backend.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep_if_due(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_EVERY_WRITES != 0 {
            return;
        }
        let now = Instant::now();
        if let Ok(mut entries) = self.entries.write() {
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now));
            let evicted = (before - entries.len()) as u64;
            if evicted > 0 {
                self.evictions.fetch_add(evicted, Ordering::Relaxed);
            }
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get_raw(&self, key: &str) -> MnemaResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                entries.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> MnemaResult<()> {
        let entry = Entry {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), entry);
        self.sweep_if_due();
        Ok(())
    }

    async fn delete(&self, key: &str) -> MnemaResult<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> MnemaResult<i64> {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        let current = entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| std::str::from_utf8(&e.value).ok()?.parse::<i64>().ok())
            .unwrap_or(0);
        let next = current + 1;

        // TTL only starts the window; an existing expiry is preserved.
        let expires_at = entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .or_else(|| ttl.map(|t| now + t));

        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn stats(&self) -> CacheStats {
        let entry_count = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len() as u64;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let cache = InMemoryCache::new();
        cache
            .put_raw("k", b"value".to_vec(), None)
            .await
            .expect("put");
        assert_eq!(
            cache.get_raw("k").await.expect("get"),
            Some(b"value".to_vec())
        );

        cache.delete("k").await.expect("delete");
        assert_eq!(cache.get_raw("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = InMemoryCache::new();
        cache
            .put_raw("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .expect("put");
        assert!(cache.get_raw("k").await.expect("get").is_some());

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get_raw("k").await.expect("get"), None);

        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_incr_counter() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.incr("count", None).await.expect("incr"), 1);
        assert_eq!(cache.incr("count", None).await.expect("incr"), 2);
        assert_eq!(cache.incr("count", None).await.expect("incr"), 3);
    }

    #[tokio::test]
    async fn test_incr_respects_initial_ttl() {
        let cache = InMemoryCache::new();
        cache
            .incr("count", Some(Duration::from_millis(10)))
            .await
            .expect("incr");
        cache
            .incr("count", Some(Duration::from_secs(600)))
            .await
            .expect("incr");

        tokio::time::sleep(Duration::from_millis(25)).await;
        // Original window applies, so the counter restarts.
        assert_eq!(
            cache
                .incr("count", Some(Duration::from_secs(1)))
                .await
                .expect("incr"),
            1
        );
    }

    #[tokio::test]
    async fn test_hit_miss_accounting() {
        let cache = InMemoryCache::new();
        cache.put_raw("k", b"v".to_vec(), None).await.expect("put");
        let _ = cache.get_raw("k").await;
        let _ = cache.get_raw("absent").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
