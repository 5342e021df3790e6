//! Server-side session store
//!
//! Sessions are opaque random tokens mapped to `SessionRecord` rows in the
//! shared cache under `session:{token}`. The cookie carries only the token;
//! everything else stays server-side. Each session carries a synchronizer
//! token for CSRF defense on cookie-authenticated writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mnema_core::{MnemaResult, SessionRecord, UserId};
use mnema_storage::{session_key, CacheBackend, CacheExt};

use super::generate_opaque_token;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "mnema_session";

/// Session store over the shared cache backend.
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Create a session for a user. Returns `(token, record)`; the token
    /// goes into the cookie, the CSRF token goes to the client once.
    pub async fn create(&self, user_id: UserId) -> MnemaResult<(String, SessionRecord)> {
        let token = generate_opaque_token();
        let now = Utc::now();
        let record = SessionRecord {
            user_id,
            csrf_token: generate_opaque_token(),
            created_at: now,
            expires_at: now
                + chrono::Duration::seconds(self.ttl.as_secs().min(i64::MAX as u64) as i64),
        };
        self.cache
            .put_json(&session_key(&token), &record, Some(self.ttl))
            .await?;
        Ok((token, record))
    }

    /// Resolve a session token; expired sessions resolve to None.
    pub async fn get(&self, token: &str) -> MnemaResult<Option<SessionRecord>> {
        let Some(record) = self
            .cache
            .get_json::<SessionRecord>(&session_key(token))
            .await?
        else {
            return Ok(None);
        };
        if record.expires_at <= Utc::now() {
            self.cache.delete(&session_key(token)).await.ok();
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Delete one session (logout).
    pub async fn delete(&self, token: &str) -> MnemaResult<()> {
        self.cache.delete(&session_key(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnema_core::EntityIdType;
    use mnema_storage::InMemoryCache;

    fn store(ttl: Duration) -> SessionStore {
        SessionStore::new(Arc::new(InMemoryCache::new()), ttl)
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = store(Duration::from_secs(60));
        let user_id = UserId::now_v7();

        let (token, record) = store.create(user_id).await.expect("create");
        assert!(!record.csrf_token.is_empty());

        let resolved = store.get(&token).await.expect("get").expect("present");
        assert_eq!(resolved.user_id, user_id);
        assert_eq!(resolved.csrf_token, record.csrf_token);
    }

    #[tokio::test]
    async fn test_logout_revokes_session() {
        let store = store(Duration::from_secs(60));
        let (token, _) = store.create(UserId::now_v7()).await.expect("create");

        store.delete(&token).await.expect("delete");
        assert!(store.get(&token).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let store = store(Duration::from_millis(10));
        let (token, _) = store.create(UserId::now_v7()).await.expect("create");

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(store.get(&token).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let store = store(Duration::from_secs(60));
        assert!(store.get("forged-token").await.expect("get").is_none());
    }
}
