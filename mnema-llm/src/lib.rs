//! Mnema LLM - Embedding & Rerank Gateway
//!
//! Provider-agnostic async traits for embeddings and candidate reranking,
//! plus the gateway that production code calls: it adds caching, a
//! concurrency cap, per-call deadlines, and retry with exponential backoff
//! and jitter on transient provider errors.

pub mod gateway;
pub mod providers;

pub use gateway::{EmbeddingGateway, GatewayConfig};
pub use providers::ollama::OllamaEmbeddingProvider;
pub use providers::openai::OpenAIEmbeddingProvider;

use async_trait::async_trait;
use mnema_core::{EmbeddingVector, MnemaResult};

// ============================================================================
// ASYNC EMBEDDING PROVIDER TRAIT
// ============================================================================

/// Async trait for embedding providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> MnemaResult<EmbeddingVector>;

    /// Generate embeddings for multiple texts in a batch.
    async fn embed_batch(&self, texts: &[&str]) -> MnemaResult<Vec<EmbeddingVector>>;

    /// Get the number of dimensions this provider produces.
    fn dimensions(&self) -> i32;

    /// Get the model identifier for this provider.
    fn model_id(&self) -> &str;

    /// Short provider tag used in cache keys and logs (e.g. "openai").
    fn provider_tag(&self) -> &str;
}

// ============================================================================
// ASYNC RERANK PROVIDER TRAIT
// ============================================================================

/// One reranked candidate: original position plus relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankedCandidate {
    pub index: usize,
    pub score: f64,
}

/// Async trait for rerank providers. Optional capability; the gateway
/// exposes whether one is configured.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    /// Reorder candidates by relevance to the query, best first.
    async fn rerank(&self, query: &str, candidates: &[&str]) -> MnemaResult<Vec<RerankedCandidate>>;

    /// Short provider tag used in logs.
    fn provider_tag(&self) -> &str;
}
