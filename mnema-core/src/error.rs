//! Error types for Mnema operations

use crate::*;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {table} with id {id}")]
    NotFound { table: String, id: String },

    #[error("Conflict on {table}: {reason}")]
    Conflict { table: String, reason: String },

    #[error("Retryable storage error: {reason}")]
    Retryable { reason: String },

    #[error("Storage backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Permission denied by backend: {reason}")]
    Permission { reason: String },

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Migration to schema version {version} failed: {reason}")]
    MigrationFailed { version: i32, reason: String },
}

/// Vector index errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VectorIndexError {
    #[error("Dimension mismatch: collection expects {expected}, got {got}")]
    DimensionMismatch { expected: i32, got: i32 },

    #[error("Collection not found: {collection}")]
    CollectionNotFound { collection: String },

    #[error("Invalid vector: {reason}")]
    InvalidVector { reason: String },

    #[error("Vector backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Vector operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Embedding / rerank provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("No embedding provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Embedding request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Reranking not supported by {provider}")]
    RerankUnsupported { provider: String },
}

/// Graph overlay errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Node not found: {node_id}")]
    NodeNotFound { node_id: NodeId },

    #[error("Edge not found: {src} -[{relation_type}]-> {dst}")]
    EdgeNotFound {
        src: NodeId,
        dst: NodeId,
        relation_type: String,
    },

    #[error("Invalid edge: {reason}")]
    InvalidEdge { reason: String },
}

/// Validation errors raised once at the ingress boundary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Field {field} exceeds limit of {limit} bytes")]
    TooLarge { field: String, limit: usize },

    #[error("Value for {field} out of range [{min}, {max}]")]
    OutOfRange { field: String, min: f64, max: f64 },
}

/// Access control errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("Role {role} is insufficient, {required} required")]
    InsufficientRole { role: Role, required: Role },

    #[error("Cross-user access to {target} denied")]
    CrossUserDenied { target: UserId },

    #[error("Owner does not exist: {owner}")]
    UnknownOwner { owner: UserId },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Provider not supported: {provider}")]
    ProviderNotSupported { provider: String },
}

/// Secret vault errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("Vault is locked (no master key provided)")]
    Locked,

    #[error("Vault encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("Vault decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("Corrupt vault blob (too short)")]
    CorruptBlob,

    #[error("Secret not found: {key_name}")]
    SecretNotFound { key_name: String },
}

/// Master error type for all Mnema errors.
#[derive(Debug, Clone, Error)]
pub enum MnemaError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Vector index error: {0}")]
    Vector(#[from] VectorIndexError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),
}

impl MnemaError {
    /// Whether a retry of the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MnemaError::Storage(StorageError::Retryable { .. })
                | MnemaError::Embedding(EmbeddingError::RateLimited { .. })
                | MnemaError::Embedding(EmbeddingError::Timeout { .. })
                | MnemaError::Vector(VectorIndexError::Timeout { .. })
        )
    }
}

/// Result type alias for Mnema operations.
pub type MnemaResult<T> = Result<T, MnemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let storage = StorageError::NotFound {
            table: "memories".to_string(),
            id: "abc".to_string(),
        };
        let err: MnemaError = storage.into();
        assert!(matches!(err, MnemaError::Storage(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        let retryable: MnemaError = StorageError::Retryable {
            reason: "serialization failure".to_string(),
        }
        .into();
        assert!(retryable.is_retryable());

        let rate_limited: MnemaError = EmbeddingError::RateLimited {
            provider: "openai".to_string(),
            retry_after_ms: 500,
        }
        .into();
        assert!(rate_limited.is_retryable());

        let conflict: MnemaError = StorageError::Conflict {
            table: "users".to_string(),
            reason: "duplicate email".to_string(),
        }
        .into();
        assert!(!conflict.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = VectorIndexError::DimensionMismatch {
            expected: 1536,
            got: 768,
        };
        let msg = err.to_string();
        assert!(msg.contains("1536"));
        assert!(msg.contains("768"));
    }
}
