//! Byte-oriented cache layer with TTL eviction
//!
//! One process-wide cache serves several concerns: session records, per-key
//! API usage counters, the embedding cache, and the hot-memory read path.
//! Keys are namespaced strings; values are opaque bytes (callers serialize
//! with serde_json).

mod keys;
mod memory;
mod read_through;
#[cfg(feature = "redis-cache")]
mod redis;
mod traits;

pub use keys::{apikey_stats_key, embed_key, hot_memory_key, session_key};
pub use memory::InMemoryCache;
pub use read_through::ReadThroughMemoryCache;
#[cfg(feature = "redis-cache")]
pub use redis::RedisCache;
pub use traits::{CacheBackend, CacheExt, CacheStats};
