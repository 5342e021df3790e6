//! Embedded in-process vector index
//!
//! Brute-force cosine scan over per-collection point maps. Exact (no
//! approximation), which keeps retrieval deterministic for fixtures and is
//! fast enough for the single-process deployments the embedded profile
//! targets.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use mnema_core::{
    EmbeddingVector, FilterExpr, HealthCheck, MnemaError, MnemaResult, VectorAttrs,
    VectorIndexError,
};
use uuid::Uuid;

use super::{attrs_match, normalize_cosine, CollectionRef, VectorHit, VectorIndex, VectorPoint};

struct Collection {
    dim: i32,
    points: HashMap<Uuid, (Vec<f32>, VectorAttrs)>,
}

/// In-process vector index.
#[derive(Default)]
pub struct EmbeddedVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl EmbeddedVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for EmbeddedVectorIndex {
    async fn ensure_collection(&self, collection: &CollectionRef, dim: i32) -> MnemaResult<()> {
        if dim <= 0 {
            return Err(MnemaError::Vector(VectorIndexError::InvalidVector {
                reason: format!("non-positive dimension {}", dim),
            }));
        }
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let entry = collections
            .entry(collection.qualified())
            .or_insert_with(|| Collection {
                dim,
                points: HashMap::new(),
            });
        if entry.dim != dim {
            return Err(MnemaError::Vector(VectorIndexError::DimensionMismatch {
                expected: entry.dim,
                got: dim,
            }));
        }
        Ok(())
    }

    async fn upsert(&self, collection: &CollectionRef, point: VectorPoint) -> MnemaResult<()> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let entry = collections.get_mut(&collection.qualified()).ok_or_else(|| {
            MnemaError::Vector(VectorIndexError::CollectionNotFound {
                collection: collection.qualified(),
            })
        })?;
        if point.vector.len() as i32 != entry.dim {
            return Err(MnemaError::Vector(VectorIndexError::DimensionMismatch {
                expected: entry.dim,
                got: point.vector.len() as i32,
            }));
        }
        entry.points.insert(point.id, (point.vector, point.attrs));
        Ok(())
    }

    async fn query(
        &self,
        collection: &CollectionRef,
        vector: &[f32],
        k: usize,
        filter: Option<&FilterExpr>,
    ) -> MnemaResult<Vec<VectorHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = collections.get(&collection.qualified()) else {
            return Ok(Vec::new());
        };
        if vector.len() as i32 != entry.dim {
            return Err(MnemaError::Vector(VectorIndexError::DimensionMismatch {
                expected: entry.dim,
                got: vector.len() as i32,
            }));
        }

        let query_vec = EmbeddingVector::new(vector.to_vec(), String::new());
        let mut hits: Vec<VectorHit> = Vec::new();
        for (id, (data, attrs)) in &entry.points {
            if !attrs_match(filter, attrs) {
                continue;
            }
            let candidate = EmbeddingVector::new(data.clone(), String::new());
            let similarity = query_vec.cosine_similarity(&candidate)?;
            hits.push(VectorHit {
                id: *id,
                score: normalize_cosine(similarity as f64),
                attrs: attrs.clone(),
            });
        }

        // Best first; ties broken by id for a deterministic order.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_point(&self, collection: &CollectionRef, id: Uuid) -> MnemaResult<()> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = collections.get_mut(&collection.qualified()) {
            entry.points.remove(&id);
        }
        Ok(())
    }

    async fn delete_by_filter(
        &self,
        collection: &CollectionRef,
        filter: &FilterExpr,
    ) -> MnemaResult<u64> {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = collections.get_mut(&collection.qualified()) else {
            return Ok(0);
        };
        let before = entry.points.len();
        entry
            .points
            .retain(|_, (_, attrs)| !attrs_match(Some(filter), attrs));
        Ok((before - entry.points.len()) as u64)
    }

    async fn count(&self, collection: &CollectionRef) -> MnemaResult<u64> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections
            .get(&collection.qualified())
            .map(|c| c.points.len() as u64)
            .unwrap_or(0))
    }

    async fn health(&self) -> HealthCheck {
        HealthCheck::healthy("vector:embedded")
    }
}
