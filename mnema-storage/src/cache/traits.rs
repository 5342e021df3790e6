//! Cache backend trait

use async_trait::async_trait;
use mnema_core::MnemaResult;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Cache backend for TTL-evicted key/value data.
///
/// Implementations must be thread-safe and tolerate concurrent access.
/// Values are opaque byte blobs; the typed helpers below serialize with
/// JSON so entries stay inspectable when debugging a live cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get raw bytes for a key, if present and not expired.
    async fn get_raw(&self, key: &str) -> MnemaResult<Option<Vec<u8>>>;

    /// Store raw bytes under a key with an optional time-to-live.
    async fn put_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> MnemaResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> MnemaResult<()>;

    /// Atomically increment a counter key, creating it at 1. A TTL supplied
    /// on creation starts the key's expiry window; later increments do not
    /// extend it.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> MnemaResult<i64>;

    /// Snapshot usage statistics.
    async fn stats(&self) -> CacheStats;
}

/// Typed convenience wrappers over the raw byte API.
#[async_trait]
pub trait CacheExt: CacheBackend {
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> MnemaResult<Option<T>> {
        match self.get_raw(key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            None => Ok(None),
        }
    }

    async fn put_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> MnemaResult<()> {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        self.put_raw(key, bytes, ttl).await
    }
}

impl<C: CacheBackend + ?Sized> CacheExt for C {}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
