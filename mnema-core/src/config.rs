//! Engine configuration types
//!
//! Plain config structs constructed once at startup and dependency-injected
//! into the engine. Environment parsing lives at the API layer; these types
//! only carry the values and their defaults.

use serde::{Deserialize, Serialize};

/// Tunables for the memory store and hybrid retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reciprocal-rank-fusion constant. Industry-standard 60; configurable
    /// until benchmarks fix it.
    pub fusion_constant: f64,

    /// Cap on candidates fetched per source: `min(4k, lexical_candidate_cap)`.
    pub candidate_cap: usize,

    /// Cap on the slice handed to the reranker: `min(rerank_cap, 4k)`.
    pub rerank_cap: usize,

    /// Maximum graph traversal depth; requests beyond are clamped, not
    /// rejected.
    pub max_graph_depth: u32,

    /// Idle horizon in seconds after which working-scope memories are
    /// eligible for gc.
    pub gc_horizon_secs: i64,

    /// TTL in seconds for hot-memory cache entries.
    pub hot_cache_ttl_secs: u64,

    /// Deadline in milliseconds for each outbound vector-index call.
    pub vector_deadline_ms: u64,

    /// Deadline in milliseconds for each outbound embedding call.
    pub embed_deadline_ms: u64,

    /// How many times retryable storage errors (deadlocks, serialization
    /// failures) are retried.
    pub storage_retries: u32,

    /// Interval in seconds between reconciler sweeps for `needs_reindex`
    /// rows.
    pub reconcile_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fusion_constant: 60.0,
            candidate_cap: 200,
            rerank_cap: 50,
            max_graph_depth: 5,
            gc_horizon_secs: 7 * 24 * 3600,
            hot_cache_ttl_secs: 300,
            vector_deadline_ms: 5_000,
            embed_deadline_ms: 15_000,
            storage_retries: 3,
            reconcile_interval_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Effective per-source candidate count for a requested `k`.
    pub fn candidates_for(&self, k: usize) -> usize {
        (4 * k).min(self.candidate_cap)
    }

    /// Effective rerank slice for a requested `k`.
    pub fn rerank_slice_for(&self, k: usize) -> usize {
        self.rerank_cap.min(4 * k)
    }

    /// Clamp a requested traversal depth.
    pub fn clamp_depth(&self, requested: u32) -> u32 {
        requested.min(self.max_graph_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_caps() {
        let config = EngineConfig::default();
        assert_eq!(config.candidates_for(3), 12);
        assert_eq!(config.candidates_for(100), 200);
        assert_eq!(config.rerank_slice_for(3), 12);
        assert_eq!(config.rerank_slice_for(50), 50);
    }

    #[test]
    fn test_depth_clamp() {
        let config = EngineConfig::default();
        assert_eq!(config.clamp_depth(3), 3);
        assert_eq!(config.clamp_depth(12), 5);
    }
}
