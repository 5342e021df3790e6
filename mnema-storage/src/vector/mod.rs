//! Vector index adapters
//!
//! Collections are identified by `(owner_user_id, logical_name)` and carry a
//! fixed dimension declared at creation; upserts with a different dimension
//! are rejected. The distance metric is cosine, with scores normalized into
//! [0, 1] before they leave the adapter.
//!
//! Filter contract: adapters use the predicate natively where the backend
//! can express it and ALWAYS re-apply it in process against the returned
//! attributes, so a hit that escapes the native pre-filter can never escape
//! the adapter.

mod embedded;
mod remote;

pub use embedded::EmbeddedVectorIndex;
pub use remote::RemoteVectorIndex;

use async_trait::async_trait;
use mnema_core::{FilterExpr, HealthCheck, MnemaResult, UserId, VectorAttrs};
use uuid::Uuid;

/// Identifier of one vector collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    pub owner: UserId,
    pub name: String,
}

impl CollectionRef {
    pub fn new(owner: UserId, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }

    /// Backend-facing collection name, unique per `(owner, logical_name)`.
    pub fn qualified(&self) -> String {
        format!("mem_{}_{}", self.owner.as_uuid().simple(), self.name)
    }
}

use mnema_core::EntityIdType;

/// One point to upsert: the embedding plus its filterable attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub attrs: VectorAttrs,
}

/// One nearest-neighbor hit. `score` is a similarity in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: Uuid,
    pub score: f64,
    pub attrs: VectorAttrs,
}

/// Vector index over per-owner collections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent, with the given dimension.
    async fn ensure_collection(&self, collection: &CollectionRef, dim: i32) -> MnemaResult<()>;

    /// Insert or replace a point. Fails with `DimensionMismatch` when the
    /// vector does not match the collection dimension.
    async fn upsert(&self, collection: &CollectionRef, point: VectorPoint) -> MnemaResult<()>;

    /// `k` nearest neighbors of `vector`, optionally filtered by attrs.
    async fn query(
        &self,
        collection: &CollectionRef,
        vector: &[f32],
        k: usize,
        filter: Option<&FilterExpr>,
    ) -> MnemaResult<Vec<VectorHit>>;

    /// Delete one point. Idempotent.
    async fn delete_point(&self, collection: &CollectionRef, id: Uuid) -> MnemaResult<()>;

    /// Delete every point matching the filter; returns how many were known
    /// to be removed (0 when the backend does not report counts).
    async fn delete_by_filter(
        &self,
        collection: &CollectionRef,
        filter: &FilterExpr,
    ) -> MnemaResult<u64>;

    /// Number of points in the collection.
    async fn count(&self, collection: &CollectionRef) -> MnemaResult<u64>;

    /// Probe backend liveness.
    async fn health(&self) -> HealthCheck;
}

/// Evaluate a predicate against a point's attributes.
pub(crate) fn attrs_match(filter: Option<&FilterExpr>, attrs: &VectorAttrs) -> bool {
    match filter {
        None => true,
        Some(f) => match serde_json::to_value(attrs) {
            Ok(json) => f.matches(&json),
            Err(_) => false,
        },
    }
}

/// Map a cosine similarity in [-1, 1] onto [0, 1].
pub(crate) fn normalize_cosine(similarity: f64) -> f64 {
    ((similarity + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_collection_names_distinct_per_owner() {
        let a = CollectionRef::new(UserId::now_v7(), "memories");
        let b = CollectionRef::new(UserId::now_v7(), "memories");
        assert_ne!(a.qualified(), b.qualified());
        assert!(a.qualified().starts_with("mem_"));
    }

    #[test]
    fn test_normalize_cosine_bounds() {
        assert_eq!(normalize_cosine(1.0), 1.0);
        assert_eq!(normalize_cosine(-1.0), 0.0);
        assert!((normalize_cosine(0.0) - 0.5).abs() < f64::EPSILON);
        assert_eq!(normalize_cosine(7.5), 1.0);
    }
}
