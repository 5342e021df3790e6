//! Canonical cache key builders
//!
//! Every cache consumer goes through these so the key layout stays in one
//! place: `session:{token}`, `apikey:stats:{hash}:{yyyy-mm-dd}`,
//! `embed:{provider}:{model}:{hash}`, `hot:{owner}:{agent}:{key}`.

use chrono::NaiveDate;
use mnema_core::UserId;

/// Key for a server-side session record.
pub fn session_key(token: &str) -> String {
    format!("session:{}", token)
}

/// Key for an API key's per-day usage counter.
pub fn apikey_stats_key(key_hash: &str, date: NaiveDate) -> String {
    format!("apikey:stats:{}:{}", key_hash, date.format("%Y-%m-%d"))
}

/// Key for a cached embedding.
pub fn embed_key(provider: &str, model: &str, text_hash: &str) -> String {
    format!("embed:{}:{}:{}", provider, model, text_hash)
}

/// Key for the hot-memory read-through cache.
pub fn hot_memory_key(owner: UserId, agent_name: &str, key: &str) -> String {
    format!("hot:{}:{}:{}", owner, agent_name, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnema_core::EntityIdType;

    #[test]
    fn test_key_shapes() {
        assert_eq!(session_key("abc"), "session:abc");

        let date = NaiveDate::from_ymd_opt(2025, 3, 9).expect("valid date");
        assert_eq!(
            apikey_stats_key("deadbeef", date),
            "apikey:stats:deadbeef:2025-03-09"
        );

        assert_eq!(
            embed_key("openai", "text-embedding-3-small", "cafe"),
            "embed:openai:text-embedding-3-small:cafe"
        );

        let owner = UserId::nil();
        let key = hot_memory_key(owner, "default", "pref_lang");
        assert!(key.starts_with("hot:00000000-"));
        assert!(key.ends_with(":default:pref_lang"));
    }
}
