//! Dense embedding vectors
//!
//! An embedding is the raw f32 payload plus the id of the model that
//! produced it. Dimensionality is derived from the payload rather than
//! stored, so a vector can never disagree with its own length; adapters
//! that need a declared dimension (collections, providers) carry their own
//! and compare against `dimensions()`.

use crate::{MnemaError, MnemaResult, VectorIndexError};
use serde::{Deserialize, Serialize};

/// A dense embedding produced by one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EmbeddingVector {
    /// Raw vector components.
    pub data: Vec<f32>,
    /// Identifier of the model that produced this embedding.
    pub model_id: String,
}

impl EmbeddingVector {
    pub fn new(data: Vec<f32>, model_id: String) -> Self {
        Self { data, model_id }
    }

    /// Dimensionality, derived from the payload.
    pub fn dimensions(&self) -> i32 {
        self.data.len() as i32
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f32 {
        self.data.iter().map(|c| c * c).sum::<f32>().sqrt()
    }

    /// Dot product against another vector of the same dimensionality.
    fn dot(&self, other: &EmbeddingVector) -> MnemaResult<f32> {
        if self.data.len() != other.data.len() {
            return Err(MnemaError::Vector(VectorIndexError::DimensionMismatch {
                expected: self.dimensions(),
                got: other.dimensions(),
            }));
        }
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Cosine similarity in [-1, 1]. A zero vector on either side yields
    /// 0.0 rather than dividing by zero.
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> MnemaResult<f32> {
        let dot = self.dot(other)?;
        let denominator = self.norm() * other.norm();
        if denominator == 0.0 {
            return Ok(0.0);
        }
        Ok(dot / denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(data: &[f32]) -> EmbeddingVector {
        EmbeddingVector::new(data.to_vec(), "test-model".to_string())
    }

    #[test]
    fn test_dimensions_track_payload() {
        assert_eq!(vector(&[0.1; 384]).dimensions(), 384);
        assert_eq!(vector(&[]).dimensions(), 0);
    }

    #[test]
    fn test_similarity_range_endpoints() {
        let up = vector(&[0.0, 2.0]);
        let down = vector(&[0.0, -1.0]);
        let right = vector(&[3.0, 0.0]);

        // Parallel, antiparallel, and orthogonal pairs hit 1, -1, and 0
        // regardless of magnitude.
        assert!((up.cosine_similarity(&up).expect("dims") - 1.0).abs() < 1e-6);
        assert!((up.cosine_similarity(&down).expect("dims") + 1.0).abs() < 1e-6);
        assert!(up.cosine_similarity(&right).expect("dims").abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_lengths_are_an_error() {
        let narrow = vector(&[1.0, 2.0]);
        let wide = vector(&[1.0, 2.0, 3.0]);

        let err = narrow
            .cosine_similarity(&wide)
            .expect_err("length mismatch");
        assert!(matches!(
            err,
            MnemaError::Vector(VectorIndexError::DimensionMismatch {
                expected: 2,
                got: 3
            })
        ));
    }

    #[test]
    fn test_zero_vector_similarity_is_zero() {
        let zero = vector(&[0.0, 0.0, 0.0]);
        let unit = vector(&[1.0, 0.0, 0.0]);
        assert_eq!(zero.cosine_similarity(&unit).expect("dims"), 0.0);
        assert_eq!(zero.cosine_similarity(&zero).expect("dims"), 0.0);
    }

    #[test]
    fn test_cached_embedding_round_trip() {
        // Embeddings pass through the shared cache as JSON.
        let original = vector(&[0.25, -0.5, 0.75]);
        let encoded = serde_json::to_vec(&original).expect("serialize");
        let decoded: EmbeddingVector = serde_json::from_slice(&encoded).expect("deserialize");
        assert_eq!(decoded, original);
        assert_eq!(decoded.dimensions(), 3);
    }
}
