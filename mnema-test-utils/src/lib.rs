//! Test utilities for Mnema
//!
//! Deterministic mock providers and a one-call embedded stack so
//! integration tests exercise the real engine against real (embedded)
//! backends without any network dependency.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mnema_core::{EmbeddingVector, FilterExpr, HealthCheck, MnemaError, MnemaResult, VectorIndexError};
use mnema_llm::{EmbeddingProvider, RerankProvider, RerankedCandidate};
use mnema_storage::{
    CollectionRef, EmbeddedBackend, EmbeddedVectorIndex, InMemoryCache, VectorHit, VectorIndex,
    VectorPoint,
};
use uuid::Uuid;

/// Dimension of mock embeddings.
pub const MOCK_DIM: usize = 16;

/// Deterministic bag-of-words embedding provider.
///
/// Tokens hash into a fixed 16-dim vector, so texts sharing words are
/// cosine-close and the same text always embeds identically. Good enough
/// for retrieval-order fixtures without any model dependency.
#[derive(Debug, Default)]
pub struct MockEmbeddingProvider;

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }

    /// The deterministic embedding for a text, exposed so tests can compute
    /// expected similarities.
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; MOCK_DIM];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 1469598103934665603;
            for b in token.bytes() {
                hash ^= u64::from(b);
                hash = hash.wrapping_mul(1099511628211);
            }
            vector[(hash % MOCK_DIM as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> MnemaResult<EmbeddingVector> {
        Ok(EmbeddingVector::new(
            Self::vector_for(text),
            "mock-bow-16".to_string(),
        ))
    }

    async fn embed_batch(&self, texts: &[&str]) -> MnemaResult<Vec<EmbeddingVector>> {
        Ok(texts
            .iter()
            .map(|t| EmbeddingVector::new(Self::vector_for(t), "mock-bow-16".to_string()))
            .collect())
    }

    fn dimensions(&self) -> i32 {
        MOCK_DIM as i32
    }

    fn model_id(&self) -> &str {
        "mock-bow-16"
    }

    fn provider_tag(&self) -> &str {
        "mock"
    }
}

/// Deterministic reranker: scores candidates by shared-token count with the
/// query, preserving input order on ties.
#[derive(Debug, Default)]
pub struct MockRerankProvider;

#[async_trait]
impl RerankProvider for MockRerankProvider {
    async fn rerank(
        &self,
        query: &str,
        candidates: &[&str],
    ) -> MnemaResult<Vec<RerankedCandidate>> {
        let query_tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let mut scored: Vec<RerankedCandidate> = candidates
            .iter()
            .enumerate()
            .map(|(index, text)| {
                let lower = text.to_lowercase();
                let hits = query_tokens.iter().filter(|t| lower.contains(*t)).count();
                RerankedCandidate {
                    index,
                    score: hits as f64 / query_tokens.len().max(1) as f64,
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.index.cmp(&b.index))
        });
        Ok(scored)
    }

    fn provider_tag(&self) -> &str {
        "mock"
    }
}

/// Vector index wrapper that fails the next N upserts, for exercising the
/// partial-write path.
pub struct FlakyVectorIndex {
    inner: EmbeddedVectorIndex,
    failures_remaining: AtomicU32,
}

impl FlakyVectorIndex {
    pub fn new(fail_next: u32) -> Self {
        Self {
            inner: EmbeddedVectorIndex::new(),
            failures_remaining: AtomicU32::new(fail_next),
        }
    }

    /// Arm the wrapper to fail the next `n` upserts.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl VectorIndex for FlakyVectorIndex {
    async fn ensure_collection(&self, collection: &CollectionRef, dim: i32) -> MnemaResult<()> {
        self.inner.ensure_collection(collection, dim).await
    }

    async fn upsert(&self, collection: &CollectionRef, point: VectorPoint) -> MnemaResult<()> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(MnemaError::Vector(VectorIndexError::Unavailable {
                reason: "injected failure".to_string(),
            }));
        }
        self.inner.upsert(collection, point).await
    }

    async fn query(
        &self,
        collection: &CollectionRef,
        vector: &[f32],
        k: usize,
        filter: Option<&FilterExpr>,
    ) -> MnemaResult<Vec<VectorHit>> {
        self.inner.query(collection, vector, k, filter).await
    }

    async fn delete_point(&self, collection: &CollectionRef, id: Uuid) -> MnemaResult<()> {
        self.inner.delete_point(collection, id).await
    }

    async fn delete_by_filter(
        &self,
        collection: &CollectionRef,
        filter: &FilterExpr,
    ) -> MnemaResult<u64> {
        self.inner.delete_by_filter(collection, filter).await
    }

    async fn count(&self, collection: &CollectionRef) -> MnemaResult<u64> {
        self.inner.count(collection).await
    }

    async fn health(&self) -> HealthCheck {
        self.inner.health().await
    }
}

/// A fully embedded stack: LMDB backend in a temp dir, in-process vector
/// index, in-memory cache, mock embedding gateway.
pub struct TestStack {
    pub backend: Arc<EmbeddedBackend>,
    pub vector: Arc<FlakyVectorIndex>,
    pub cache: Arc<InMemoryCache>,
    pub gateway: Arc<mnema_llm::EmbeddingGateway>,
    /// Keep the temp dir alive for the stack's lifetime.
    _dir: tempfile::TempDir,
}

impl TestStack {
    /// Build a stack with a working vector index.
    pub fn new() -> Self {
        Self::with_vector_failures(0, false)
    }

    /// Build a stack whose vector index fails the next `fail_upserts`
    /// upserts; `with_reranker` adds the mock reranker.
    pub fn with_vector_failures(fail_upserts: u32, with_reranker: bool) -> Self {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let backend = Arc::new(EmbeddedBackend::new(dir.path(), 32).expect("embedded backend"));
        let vector = Arc::new(FlakyVectorIndex::new(fail_upserts));
        let cache = Arc::new(InMemoryCache::new());

        let reranker: Option<Arc<dyn RerankProvider>> = if with_reranker {
            Some(Arc::new(MockRerankProvider))
        } else {
            None
        };
        let gateway = Arc::new(mnema_llm::EmbeddingGateway::new(
            Arc::new(MockEmbeddingProvider::new()),
            reranker,
            cache.clone(),
            mnema_llm::GatewayConfig::default(),
        ));

        Self {
            backend,
            vector,
            cache,
            gateway,
            _dir: dir,
        }
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnema_core::EntityIdType;

    #[tokio::test]
    async fn test_mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("backend development").await.expect("embed");
        let b = provider.embed("backend development").await.expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.dimensions() as usize, MOCK_DIM);
    }

    #[tokio::test]
    async fn test_shared_tokens_are_closer() {
        let provider = MockEmbeddingProvider::new();
        let query = provider.embed("rust backend").await.expect("embed");
        let close = provider.embed("rust backend services").await.expect("embed");
        let far = provider.embed("gardening tips").await.expect("embed");

        let close_sim = query.cosine_similarity(&close).expect("dims");
        let far_sim = query.cosine_similarity(&far).expect("dims");
        assert!(close_sim > far_sim);
    }

    #[tokio::test]
    async fn test_flaky_vector_index_fails_then_recovers() {
        let index = FlakyVectorIndex::new(1);
        let owner = mnema_core::UserId::now_v7();
        let collection = CollectionRef::new(owner, "memories");
        index
            .ensure_collection(&collection, 2)
            .await
            .expect("ensure");

        let point = VectorPoint {
            id: Uuid::now_v7(),
            vector: vec![1.0, 0.0],
            attrs: mnema_core::VectorAttrs {
                owner_user_id: owner,
                agent_name: "default".to_string(),
                tags: vec![],
                scope: mnema_core::MemoryScope::Persistent,
                kind: mnema_core::MemoryKind::Normal,
                importance: 0.5,
            },
        };

        assert!(index.upsert(&collection, point.clone()).await.is_err());
        assert!(index.upsert(&collection, point).await.is_ok());
    }
}
