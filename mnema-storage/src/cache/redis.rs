//! Redis-compatible networked cache backend
//!
//! Enabled with the `redis-cache` feature and selected at startup with
//! `CACHE_BACKEND=networked`. Counters and TTLs map directly onto the
//! server's INCR/EXPIRE primitives, so multi-process deployments share one
//! usage-counter and session space.

use async_trait::async_trait;
use fred::prelude::*;
use mnema_core::{MnemaError, MnemaResult, StorageError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::traits::{CacheBackend, CacheStats};

fn map_err(e: fred::error::Error) -> MnemaError {
    MnemaError::Storage(StorageError::Unavailable {
        reason: format!("redis cache: {}", e),
    })
}

/// Networked cache backend speaking the Redis protocol.
pub struct RedisCache {
    client: Client,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisCache {
    /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> MnemaResult<Self> {
        let config = Config::from_url(url).map_err(map_err)?;
        let client = Builder::from_config(config).build().map_err(map_err)?;
        client.init().await.map_err(map_err)?;
        Ok(Self {
            client,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get_raw(&self, key: &str) -> MnemaResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = self.client.get(key).await.map_err(map_err)?;
        match value {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(v))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put_raw(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> MnemaResult<()> {
        let expiration = ttl.map(|t| Expiration::EX(t.as_secs().max(1) as i64));
        let _: () = self
            .client
            .set(key, value, expiration, None, false)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> MnemaResult<()> {
        let _: i64 = self.client.del(key).await.map_err(map_err)?;
        Ok(())
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> MnemaResult<i64> {
        let next: i64 = self.client.incr(key).await.map_err(map_err)?;
        if next == 1 {
            if let Some(ttl) = ttl {
                let _: bool = self
                    .client
                    .expire(key, ttl.as_secs().max(1) as i64, None)
                    .await
                    .map_err(map_err)?;
            }
        }
        Ok(next)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            // Entry counts live on the server; DBSIZE is intentionally not
            // polled on the stats path.
            entry_count: 0,
            evictions: 0,
        }
    }
}
