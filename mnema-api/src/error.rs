//! Error Types for the Mnema API
//!
//! Structured error responses with a closed error-code taxonomy. Every
//! handler returns `ApiResult<T>`; engine errors map into this type at the
//! route boundary, and `IntoResponse` turns it into the right HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mnema_core::{
    AccessError, EmbeddingError, MnemaError, StorageError, VaultError, VectorIndexError,
};
use mnema_engine::ToolError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents one
/// category of failure a request can hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401, 403)
    // ========================================================================
    /// Request lacks valid authentication credentials
    Unauthorized,

    /// Request is authenticated but lacks permission for the resource
    Forbidden,

    /// Authentication token is invalid or malformed
    InvalidToken,

    /// Authentication token has expired
    TokenExpired,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field value is out of valid range
    InvalidRange,

    // ========================================================================
    // Not Found / Conflict (404, 409)
    // ========================================================================
    /// Requested entity does not exist for this principal
    NotFound,

    /// Unique-key collision or stale write
    Conflict,

    // ========================================================================
    // Throughput / Upstream (429, 504, 503)
    // ========================================================================
    /// Outbound quota exhausted
    RateLimited,

    /// Deadline exceeded
    Timeout,

    /// A backing service is down; the request cannot proceed
    DependencyUnavailable,

    // ========================================================================
    // Server (500)
    // ========================================================================
    /// Invariant violation or unexpected adapter error
    Internal,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized | ErrorCode::InvalidToken | ErrorCode::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }

            ErrorCode::Forbidden => StatusCode::FORBIDDEN,

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidRange => StatusCode::BAD_REQUEST,

            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Conflict => StatusCode::CONFLICT,

            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::Forbidden => "Access forbidden",
            ErrorCode::InvalidToken => "Invalid authentication token",
            ErrorCode::TokenExpired => "Authentication token has expired",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidRange => "Value is out of valid range",
            ErrorCode::NotFound => "Not found",
            ErrorCode::Conflict => "Conflicting write",
            ErrorCode::RateLimited => "Rate limit exceeded",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::DependencyUnavailable => "A backing service is unavailable",
            ErrorCode::Internal => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (field errors, correlation ids)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn token_expired() -> Self {
        Self::from_code(ErrorCode::TokenExpired)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }

    pub fn dependency_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DependencyUnavailable, message)
    }

    /// Internal errors log with a correlation id and surface generically.
    pub fn internal_error(message: impl Into<String>) -> Self {
        let correlation_id = uuid::Uuid::new_v4();
        let message = message.into();
        tracing::error!(%correlation_id, %message, "internal error");
        Self::new(ErrorCode::Internal, "Internal server error")
            .with_details(serde_json::json!({ "correlation_id": correlation_id.to_string() }))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM ENGINE ERRORS
// ============================================================================

impl From<MnemaError> for ApiError {
    fn from(err: MnemaError) -> Self {
        match err {
            MnemaError::Validation(e) => ApiError::validation_failed(e.to_string()),
            MnemaError::Access(AccessError::CrossUserDenied { .. }) => {
                ApiError::forbidden("Cross-user access denied")
            }
            MnemaError::Access(AccessError::InsufficientRole { role, required }) => {
                ApiError::forbidden(format!("Role {} is insufficient, {} required", role, required))
            }
            MnemaError::Access(AccessError::UnknownOwner { owner }) => {
                ApiError::validation_failed(format!("Owner {} does not exist", owner))
            }
            MnemaError::Storage(StorageError::NotFound { table, id }) => {
                ApiError::not_found(format!("{} {} not found", table, id))
            }
            MnemaError::Storage(StorageError::Conflict { table, .. }) => {
                ApiError::conflict(format!("Conflicting write to {}", table))
            }
            MnemaError::Storage(StorageError::Unavailable { .. })
            | MnemaError::Vector(VectorIndexError::Unavailable { .. }) => {
                ApiError::dependency_unavailable("A backing service is unavailable")
            }
            MnemaError::Storage(StorageError::Retryable { .. }) => {
                ApiError::dependency_unavailable("Transient storage contention; retry")
            }
            MnemaError::Vector(VectorIndexError::Timeout { .. }) => ApiError::timeout("vector"),
            MnemaError::Embedding(EmbeddingError::Timeout { .. }) => {
                ApiError::timeout("embedding")
            }
            MnemaError::Embedding(EmbeddingError::RateLimited { .. }) => {
                ApiError::rate_limited("Embedding provider quota exhausted")
            }
            MnemaError::Graph(e) => ApiError::not_found(e.to_string()),
            MnemaError::Vault(VaultError::Locked) => {
                ApiError::dependency_unavailable("Secret vault is locked")
            }
            MnemaError::Vault(VaultError::SecretNotFound { key_name }) => {
                ApiError::not_found(format!("Secret {} not found", key_name))
            }
            other => ApiError::internal_error(other.to_string()),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound { name } => {
                ApiError::not_found(format!("Tool {} not found", name))
            }
            ToolError::Forbidden {
                name,
                role,
                required,
            } => ApiError::forbidden(format!(
                "Tool {} requires {}, caller has {}",
                name, required, role
            )),
            ToolError::InvalidInput { name, reason } => {
                ApiError::validation_failed(format!("Invalid input for {}: {}", name, reason))
            }
            ToolError::Engine(e) => e.into(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_input(format!("Invalid UUID: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::ValidationFailed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::DependencyUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorCode::Internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_engine_error_mapping() {
        let err: ApiError = MnemaError::Storage(StorageError::NotFound {
            table: "memories".to_string(),
            id: "abc".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::NotFound);

        let err: ApiError = MnemaError::Access(AccessError::CrossUserDenied {
            target: mnema_core::UserId::default(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::Forbidden);

        let err: ApiError = MnemaError::Embedding(EmbeddingError::RateLimited {
            provider: "openai".to_string(),
            retry_after_ms: 100,
        })
        .into();
        assert_eq!(err.code, ErrorCode::RateLimited);
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let err = ApiError::internal_error("database password was rejected");
        assert_eq!(err.message, "Internal server error");
        assert!(err.details.is_some());
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::unauthorized("Invalid token");
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("UNAUTHORIZED"));
        assert!(json.contains("Invalid token"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }
}
