//! Mnema Storage - Relational, Cache, and Vector Adapters
//!
//! Defines the storage abstraction layer and its two relational
//! implementations (embedded LMDB, networked PostgreSQL), the byte-oriented
//! cache layer, and the vector index adapters. Callers express queries in
//! the closed `FilterExpr` algebra from `mnema-core`; no backend-specific
//! query text ever crosses this boundary.

pub mod backend;
pub mod cache;
pub mod embedded;
pub mod postgres;
pub mod vector;

pub use backend::{tables, MemoryBackend, Query, WriteOp};
pub use cache::{
    apikey_stats_key, embed_key, hot_memory_key, session_key, CacheBackend, CacheExt,
    CacheStats, InMemoryCache, ReadThroughMemoryCache,
};
#[cfg(feature = "redis-cache")]
pub use cache::RedisCache;
pub use embedded::EmbeddedBackend;
pub use postgres::{PgBackend, PgConfig};
pub use vector::{
    CollectionRef, EmbeddedVectorIndex, RemoteVectorIndex, VectorHit, VectorIndex, VectorPoint,
};
