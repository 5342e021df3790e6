//! Per-key write serialization
//!
//! Writes to the same `(owner, agent, key)` triple are serialized through a
//! keyed semaphore map; writes to different keys proceed in parallel. Graph
//! mutations use the same map keyed by owner.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Manages per-key mutual-exclusion permits.
///
/// Each key maps to a `Semaphore(1)`. Acquiring the permit gives exclusive
/// access until it is dropped.
pub struct KeyLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for KeyLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for a key. The permit auto-releases on drop.
    pub async fn acquire(&self, key: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };

        // The semaphore is never closed, so acquisition cannot fail.
        sem.acquire_owned()
            .await
            .expect("key lock semaphore closed")
    }

    /// Number of tracked keys (for monitoring).
    pub fn key_count(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Remove entries for keys that are not currently held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sequential_access() {
        let map = KeyLockMap::new();

        let permit1 = map.acquire("owner/agent/k1").await;
        drop(permit1);

        let permit2 = map.acquire("owner/agent/k1").await;
        drop(permit2);
    }

    #[tokio::test]
    async fn test_different_keys_concurrent() {
        let map = Arc::new(KeyLockMap::new());

        let p1 = map.acquire("k1").await;
        let p2 = map.acquire("k2").await;

        assert_eq!(map.key_count(), 2);

        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn test_same_key_waits() {
        let map = Arc::new(KeyLockMap::new());
        let map2 = map.clone();

        let p1 = map.acquire("k1").await;

        let handle = tokio::spawn(async move {
            let _p2 = map2.acquire("k1").await;
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(p1);

        assert_eq!(handle.await.expect("task"), 42);
    }

    #[tokio::test]
    async fn test_prune_idle_keeps_held_locks() {
        let map = KeyLockMap::new();
        let _held = map.acquire("held").await;
        drop(map.acquire("released").await);

        map.prune_idle();
        assert_eq!(map.key_count(), 1);
    }
}
