//! Embedding gateway
//!
//! Wraps a provider with the policies every call site needs: a bounded
//! in-process LRU keyed by `(provider, model, sha256(text))`, write-through
//! to the shared cache under `embed:` keys, a semaphore concurrency cap,
//! per-call deadlines, and retry with exponential backoff plus jitter on
//! transient errors.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use mnema_core::{
    compute_content_hash_hex, EmbeddingError, EmbeddingVector, MnemaError, MnemaResult,
};
use mnema_storage::{embed_key, CacheBackend, CacheExt};
use rand::Rng;
use tokio::sync::Semaphore;

use crate::{EmbeddingProvider, RerankProvider, RerankedCandidate};

/// Gateway policy knobs.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// In-process LRU capacity (entries).
    pub lru_capacity: usize,
    /// TTL for shared-cache embedding entries.
    pub shared_cache_ttl: Duration,
    /// Maximum concurrent in-flight provider calls.
    pub max_concurrency: usize,
    /// Per-call deadline.
    pub deadline: Duration,
    /// Retry attempts on transient errors.
    pub retries: u32,
    /// Base backoff; doubles per attempt, with up to 50% jitter added.
    pub backoff_base: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            lru_capacity: 4096,
            shared_cache_ttl: Duration::from_secs(24 * 3600),
            max_concurrency: 8,
            deadline: Duration::from_secs(15),
            retries: 3,
            backoff_base: Duration::from_millis(200),
        }
    }
}

/// Provider-agnostic embedding gateway.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn RerankProvider>>,
    shared_cache: Arc<dyn CacheBackend>,
    lru: Mutex<LruCache<String, EmbeddingVector>>,
    limiter: Arc<Semaphore>,
    config: GatewayConfig,
}

impl EmbeddingGateway {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn RerankProvider>>,
        shared_cache: Arc<dyn CacheBackend>,
        config: GatewayConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.lru_capacity.max(1))
            .unwrap_or_else(|| NonZeroUsize::new(1).expect("1 is non-zero"));
        Self {
            provider,
            reranker,
            shared_cache,
            lru: Mutex::new(LruCache::new(capacity)),
            limiter: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
        }
    }

    /// Dimension of the configured provider's embeddings.
    pub fn dimensions(&self) -> i32 {
        self.provider.dimensions()
    }

    /// Model identifier of the configured provider.
    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    /// Whether a rerank provider is configured.
    pub fn supports_rerank(&self) -> bool {
        self.reranker.is_some()
    }

    fn cache_key(&self, text: &str) -> String {
        embed_key(
            self.provider.provider_tag(),
            self.provider.model_id(),
            &compute_content_hash_hex(text.as_bytes()),
        )
    }

    fn lru_get(&self, key: &str) -> Option<EmbeddingVector> {
        self.lru
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn lru_put(&self, key: String, vector: EmbeddingVector) {
        self.lru
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, vector);
    }

    /// Embed one text, consulting caches first.
    pub async fn embed(&self, text: &str) -> MnemaResult<EmbeddingVector> {
        let key = self.cache_key(text);

        if let Some(hit) = self.lru_get(&key) {
            return Ok(hit);
        }
        if let Some(hit) = self.shared_cache.get_json::<EmbeddingVector>(&key).await? {
            self.lru_put(key, hit.clone());
            return Ok(hit);
        }

        let vector = self.call_provider(text).await?;

        self.lru_put(key.clone(), vector.clone());
        // Best-effort write-through; a cache failure must not fail the embed.
        if let Err(e) = self
            .shared_cache
            .put_json(&key, &vector, Some(self.config.shared_cache_ttl))
            .await
        {
            tracing::debug!(error = %e, "embedding cache write failed");
        }
        Ok(vector)
    }

    /// Embed many texts, reusing cached entries per text.
    pub async fn embed_batch(&self, texts: &[&str]) -> MnemaResult<Vec<EmbeddingVector>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Rerank candidates with the configured provider.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: &[&str],
    ) -> MnemaResult<Vec<RerankedCandidate>> {
        let reranker = self.reranker.as_ref().ok_or_else(|| {
            MnemaError::Embedding(EmbeddingError::RerankUnsupported {
                provider: self.provider.provider_tag().to_string(),
            })
        })?;
        reranker.rerank(query, candidates).await
    }

    async fn call_provider(&self, text: &str) -> MnemaResult<EmbeddingVector> {
        let _permit = self.limiter.acquire().await.map_err(|_| {
            MnemaError::Embedding(EmbeddingError::ProviderNotConfigured)
        })?;

        let mut attempt = 0u32;
        loop {
            let call = self.provider.embed(text);
            let result = match tokio::time::timeout(self.config.deadline, call).await {
                Ok(result) => result,
                Err(_) => Err(MnemaError::Embedding(EmbeddingError::Timeout {
                    elapsed_ms: self.config.deadline.as_millis() as u64,
                })),
            };

            match result {
                Ok(vector) => {
                    let expected = self.provider.dimensions();
                    if vector.dimensions() != expected {
                        return Err(MnemaError::Embedding(EmbeddingError::InvalidResponse {
                            provider: self.provider.provider_tag().to_string(),
                            reason: format!(
                                "expected {} dimensions, got {}",
                                expected,
                                vector.dimensions()
                            ),
                        }));
                    }
                    return Ok(vector);
                }
                Err(e) if e.is_retryable() && attempt < self.config.retries => {
                    attempt += 1;
                    let backoff = self.config.backoff_base * 2u32.pow(attempt - 1);
                    let jitter_ms = rand::thread_rng()
                        .gen_range(0..=backoff.as_millis().max(1) as u64 / 2);
                    let wait = backoff + Duration::from_millis(jitter_ms);
                    tracing::debug!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "retrying embedding call"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mnema_storage::InMemoryCache;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Deterministic provider counting its invocations.
    struct CountingProvider {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl CountingProvider {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> MnemaResult<EmbeddingVector> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(MnemaError::Embedding(EmbeddingError::RateLimited {
                    provider: "mock".to_string(),
                    retry_after_ms: 1,
                }));
            }
            let seed = text.len() as f32;
            Ok(EmbeddingVector::new(vec![seed, 1.0, 0.0], "mock-model".to_string()))
        }

        async fn embed_batch(&self, texts: &[&str]) -> MnemaResult<Vec<EmbeddingVector>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }

        fn dimensions(&self) -> i32 {
            3
        }

        fn model_id(&self) -> &str {
            "mock-model"
        }

        fn provider_tag(&self) -> &str {
            "mock"
        }
    }

    fn gateway(provider: Arc<CountingProvider>) -> EmbeddingGateway {
        EmbeddingGateway::new(
            provider,
            None,
            Arc::new(InMemoryCache::new()),
            GatewayConfig {
                backoff_base: Duration::from_millis(1),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_embed_caches_by_text() {
        let provider = Arc::new(CountingProvider::new(0));
        let gw = gateway(provider.clone());

        let first = gw.embed("hello").await.expect("embed");
        let second = gw.embed("hello").await.expect("embed");
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        gw.embed("different").await.expect("embed");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_on_rate_limit() {
        let provider = Arc::new(CountingProvider::new(2));
        let gw = gateway(provider.clone());

        let vector = gw.embed("hello").await.expect("eventually succeeds");
        assert_eq!(vector.dimensions(), 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let provider = Arc::new(CountingProvider::new(100));
        let gw = gateway(provider);

        let err = gw.embed("hello").await.expect_err("must exhaust retries");
        assert!(matches!(
            err,
            MnemaError::Embedding(EmbeddingError::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn test_rerank_unsupported_without_provider() {
        let provider = Arc::new(CountingProvider::new(0));
        let gw = gateway(provider);
        assert!(!gw.supports_rerank());

        let err = gw.rerank("q", &["a", "b"]).await.expect_err("no reranker");
        assert!(matches!(
            err,
            MnemaError::Embedding(EmbeddingError::RerankUnsupported { .. })
        ));
    }
}
