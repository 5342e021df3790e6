//! Hybrid retrieval engine
//!
//! Combines lexical candidates from the relational backend with nearest
//! neighbors from the vector index, fuses them by reciprocal-rank
//! combination, optionally reranks the head of the list, and returns a
//! deterministically ordered top-k. Ownership is enforced server-side: the
//! effective filter is always AND-ed with the principal's user id.

use std::collections::HashMap;
use std::sync::Arc;

use mnema_core::{
    EngineConfig, EntityIdType, FilterExpr, MemoryKind, MemoryRecord, MemoryScope, MnemaResult,
    Principal, SearchMode, SourceOrigin, UserId,
};
use mnema_llm::EmbeddingGateway;
use mnema_storage::{backend::tables, CollectionRef, MemoryBackend, VectorIndex};
use serde_json::json;
use uuid::Uuid;

use crate::codec::decode_row;
use crate::memory::{MemoryStore, MEMORY_COLLECTION};

/// Attribute filter for retrieval, AND-ed with the owner scope.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub agent_name: Option<String>,
    pub scope: Option<MemoryScope>,
    pub kind: Option<MemoryKind>,
    pub tags: Vec<String>,
    pub min_importance: Option<f64>,
    pub max_importance: Option<f64>,
    /// Residual regex over tags, applied in process after the backends.
    pub tag_pattern: Option<String>,
}

/// One retrieval request.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query_text: Option<String>,
    pub filter: SearchFilter,
    pub k: usize,
    pub mode: SearchMode,
    pub rerank: bool,
    /// Record an access on every returned memory. Off by default so
    /// retrieval does not bias itself.
    pub mark_accessed: bool,
    /// Admin-only explicit owner override.
    pub target_user: Option<UserId>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            query_text: None,
            filter: SearchFilter::default(),
            k: 10,
            mode: SearchMode::Hybrid,
            rerank: false,
            mark_accessed: false,
            target_user: None,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub record: MemoryRecord,
    pub score: f64,
    pub origins: Vec<SourceOrigin>,
}

/// Compact variant returned by `retrieve_ids`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SearchResultPreview {
    pub memory_id: mnema_core::MemoryId,
    pub key: String,
    pub preview: String,
    pub score: f64,
    pub origins: Vec<SourceOrigin>,
}

/// Length of previews returned by `retrieve_ids`.
const PREVIEW_CHARS: usize = 160;

struct Candidate {
    record: MemoryRecord,
    lexical_rank: Option<usize>,
    vector_rank: Option<usize>,
    lexical_score: f64,
    vector_score: f64,
    rerank_score: Option<f64>,
    origins: Vec<SourceOrigin>,
}

/// Hybrid retrieval engine.
pub struct SearchEngine {
    backend: Arc<dyn MemoryBackend>,
    vector: Arc<dyn VectorIndex>,
    gateway: Arc<EmbeddingGateway>,
    memories: Arc<MemoryStore>,
    config: EngineConfig,
}

impl SearchEngine {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        vector: Arc<dyn VectorIndex>,
        gateway: Arc<EmbeddingGateway>,
        memories: Arc<MemoryStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            vector,
            gateway,
            memories,
            config,
        }
    }

    fn row_filter(owner: UserId, filter: &SearchFilter) -> MnemaResult<FilterExpr> {
        let mut predicate = FilterExpr::eq("owner_user_id", json!(owner.to_string()));
        if let Some(agent) = &filter.agent_name {
            predicate = predicate.and(FilterExpr::eq("agent_name", json!(agent)));
        }
        if let Some(scope) = filter.scope {
            predicate = predicate.and(FilterExpr::eq("scope", json!(scope)));
        }
        if let Some(kind) = filter.kind {
            predicate = predicate.and(FilterExpr::eq("kind", json!(kind)));
        }
        if !filter.tags.is_empty() {
            let tags = mnema_core::normalize_tags(&filter.tags)?;
            predicate = predicate.and(FilterExpr::tags_any("tags", tags));
        }
        if filter.min_importance.is_some() || filter.max_importance.is_some() {
            predicate = predicate.and(FilterExpr::range(
                "importance",
                filter.min_importance,
                filter.max_importance,
            ));
        }
        Ok(predicate)
    }

    /// Residual filters the backends cannot express natively.
    fn post_filter(filter: &SearchFilter, record: &MemoryRecord) -> bool {
        if let Some(pattern) = &filter.tag_pattern {
            match regex_lite_match(pattern, &record.tags) {
                Some(matched) => matched,
                None => false,
            }
        } else {
            true
        }
    }

    /// Full retrieval per the fusion pipeline.
    pub async fn search(
        &self,
        principal: Principal,
        query: SearchQuery,
    ) -> MnemaResult<Vec<SearchResult>> {
        // Step 1: resolve the effective owner; everyone but admins is
        // pinned to their own data.
        let owner = principal.effective_owner(query.target_user)?;

        // k = 0 returns an empty ranked list and makes no backend calls.
        if query.k == 0 {
            return Ok(Vec::new());
        }

        let row_filter = Self::row_filter(owner, &query.filter)?;
        let query_text = query
            .query_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        // Empty query degrades to filter-only listing ordered by importance
        // then recency.
        let Some(text) = query_text else {
            return self.filter_only(owner, &query, row_filter).await;
        };

        let candidate_cap = self.config.candidates_for(query.k);
        let mut candidates: HashMap<Uuid, Candidate> = HashMap::new();

        // Step 2: lexical candidates.
        if matches!(query.mode, SearchMode::Lexical | SearchMode::Hybrid) {
            let hits = self
                .backend
                .text_search(
                    tables::MEMORIES,
                    Some(&row_filter),
                    "value",
                    text,
                    candidate_cap,
                )
                .await?;
            for (rank, (row, score)) in hits.into_iter().enumerate() {
                let record: MemoryRecord = decode_row(tables::MEMORIES, row)?;
                candidates.insert(
                    record.memory_id.as_uuid(),
                    Candidate {
                        record,
                        lexical_rank: Some(rank),
                        vector_rank: None,
                        lexical_score: score.clamp(0.0, 1.0),
                        vector_score: 0.0,
                        rerank_score: None,
                        origins: vec![SourceOrigin::Lexical],
                    },
                );
            }
        }

        // Step 3: vector candidates with the same filter.
        if matches!(query.mode, SearchMode::Vector | SearchMode::Hybrid) {
            let embedded = self.gateway.embed(text).await?;
            let collection = CollectionRef::new(owner, MEMORY_COLLECTION);
            let hits = self
                .vector
                .query(&collection, &embedded.data, candidate_cap, Some(&row_filter))
                .await?;

            for (rank, hit) in hits.into_iter().enumerate() {
                if let Some(existing) = candidates.get_mut(&hit.id) {
                    existing.vector_rank = Some(rank);
                    existing.vector_score = hit.score;
                    existing.origins.push(SourceOrigin::Vector);
                    continue;
                }
                // Hydrate the full record for vector-only hits.
                let Some(row) = self.backend.get(tables::MEMORIES, hit.id).await? else {
                    continue;
                };
                let record: MemoryRecord = decode_row(tables::MEMORIES, row)?;
                candidates.insert(
                    hit.id,
                    Candidate {
                        record,
                        lexical_rank: None,
                        vector_rank: Some(rank),
                        lexical_score: 0.0,
                        vector_score: hit.score,
                        rerank_score: None,
                        origins: vec![SourceOrigin::Vector],
                    },
                );
            }
        }

        // Step 4/5: fuse and apply residual post-filters.
        let fusion_c = self.config.fusion_constant;
        let mut scored: Vec<(Candidate, f64)> = candidates
            .into_values()
            .filter(|c| Self::post_filter(&query.filter, &c.record))
            .map(|c| {
                let score = match query.mode {
                    SearchMode::Lexical => c.lexical_score,
                    SearchMode::Vector => c.vector_score,
                    SearchMode::Hybrid => {
                        // Reciprocal-rank fusion; a candidate present in a
                        // single source still participates.
                        let mut fused = 0.0;
                        if let Some(rank) = c.lexical_rank {
                            fused += 1.0 / (rank as f64 + 1.0 + fusion_c);
                        }
                        if let Some(rank) = c.vector_rank {
                            fused += 1.0 / (rank as f64 + 1.0 + fusion_c);
                        }
                        fused
                    }
                };
                (c, score)
            })
            .collect();

        // Step 7 ordering runs first so the rerank slice is the head of
        // the fused ranking.
        Self::order(&mut scored);

        // Step 6: optional rerank of the head; the tail keeps its fused
        // order below the reranked slice.
        if query.rerank && self.gateway.supports_rerank() {
            let slice = self.config.rerank_slice_for(query.k).min(scored.len());
            let texts: Vec<&str> = scored[..slice]
                .iter()
                .map(|(c, _)| c.record.value.as_str())
                .collect();
            match self.gateway.rerank(text, &texts).await {
                Ok(reranked) => {
                    for entry in &reranked {
                        if let Some((candidate, score)) = scored.get_mut(entry.index) {
                            candidate.rerank_score = Some(entry.score);
                            candidate.origins.push(SourceOrigin::Rerank);
                            *score = entry.score;
                        }
                    }
                    Self::order(&mut scored[..slice]);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "rerank failed; keeping fused order");
                }
            }
        }

        scored.truncate(query.k);

        // Optionally record accesses on the returned set.
        let mut results = Vec::with_capacity(scored.len());
        for (mut candidate, score) in scored {
            if query.mark_accessed {
                self.memories.mark_accessed(&mut candidate.record).await;
            }
            candidate.origins.sort();
            candidate.origins.dedup();
            results.push(SearchResult {
                record: candidate.record,
                score,
                origins: candidate.origins,
            });
        }
        Ok(results)
    }

    /// Compact retrieval: ids plus previews only.
    pub async fn retrieve_ids(
        &self,
        principal: Principal,
        query: SearchQuery,
    ) -> MnemaResult<Vec<SearchResultPreview>> {
        let results = self.search(principal, query).await?;
        Ok(results
            .into_iter()
            .map(|r| SearchResultPreview {
                memory_id: r.record.memory_id,
                key: r.record.key.clone(),
                preview: r.record.value.chars().take(PREVIEW_CHARS).collect(),
                score: r.score,
                origins: r.origins,
            })
            .collect())
    }

    async fn filter_only(
        &self,
        _owner: UserId,
        query: &SearchQuery,
        row_filter: FilterExpr,
    ) -> MnemaResult<Vec<SearchResult>> {
        let rows = self
            .backend
            .query(
                tables::MEMORIES,
                &mnema_storage::Query::filtered(row_filter),
            )
            .await?;

        let mut records: Vec<MemoryRecord> = rows
            .into_iter()
            .map(|row| decode_row(tables::MEMORIES, row))
            .collect::<MnemaResult<_>>()?;
        records.retain(|r| Self::post_filter(&query.filter, r));

        records.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| a.key.cmp(&b.key))
        });
        records.truncate(query.k);

        Ok(records
            .into_iter()
            .map(|record| SearchResult {
                record,
                score: 0.0,
                origins: Vec::new(),
            })
            .collect())
    }

    /// Tie-breaking order: score desc, importance desc, updated_at desc,
    /// key asc.
    fn order(scored: &mut [(Candidate, f64)]) {
        scored.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.record
                        .importance
                        .partial_cmp(&a.record.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.record.updated_at.cmp(&a.record.updated_at))
                .then_with(|| a.record.key.cmp(&b.record.key))
        });
    }
}

/// Residual tag pattern matcher. `None` means the pattern failed to
/// compile, which the caller treats as matching nothing.
fn regex_lite_match(pattern: &str, tags: &[String]) -> Option<bool> {
    let re = regex::Regex::new(pattern).ok()?;
    Some(tags.iter().any(|t| re.is_match(t)))
}
