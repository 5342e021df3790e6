//! Enum types for Mnema entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// MEMORY ENUMS
// ============================================================================

/// Lifecycle class of a memory record.
///
/// Working memories are eligible for garbage collection once idle past the
/// configured horizon; persistent memories are retained until explicitly
/// deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    Working,
    #[default]
    Persistent,
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryScope::Working => write!(f, "working"),
            MemoryScope::Persistent => write!(f, "persistent"),
        }
    }
}

impl FromStr for MemoryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "working" => Ok(MemoryScope::Working),
            "persistent" => Ok(MemoryScope::Persistent),
            other => Err(format!("unknown memory scope: {}", other)),
        }
    }
}

/// Category tag for a memory record. Used for grouping, never for access
/// control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[default]
    Normal,
    Coding,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Normal => write!(f, "normal"),
            MemoryKind::Coding => write!(f, "coding"),
        }
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(MemoryKind::Normal),
            "coding" => Ok(MemoryKind::Coding),
            other => Err(format!("unknown memory kind: {}", other)),
        }
    }
}

// ============================================================================
// ACCESS CONTROL
// ============================================================================

/// User role. Totally ordered: Admin > User > ReadOnly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ReadOnly,
    #[default]
    User,
    Admin,
}

impl Role {
    /// Whether this role grants at least the privileges of `required`.
    pub fn at_least(&self, required: Role) -> bool {
        *self >= required
    }

    /// Whether this role may act on data owned by another user.
    pub fn can_cross_user(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::User => write!(f, "user"),
            Role::ReadOnly => write!(f, "read_only"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "read_only" | "readonly" => Ok(Role::ReadOnly),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

// ============================================================================
// RETRIEVAL ENUMS
// ============================================================================

/// Retrieval mode for the hybrid search pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Lexical,
    #[default]
    Hybrid,
}

/// Which candidate sources contributed to a search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    Lexical,
    Vector,
    Rerank,
}

// ============================================================================
// GRAPH ENUMS
// ============================================================================

/// Direction for graph traversal queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum TraversalDirection {
    #[default]
    Outbound,
    Inbound,
    Both,
}

// ============================================================================
// OAUTH2 ENUMS
// ============================================================================

/// PKCE code challenge transformation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum CodeChallengeMethod {
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl FromStr for CodeChallengeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(CodeChallengeMethod::S256),
            "plain" => Ok(CodeChallengeMethod::Plain),
            other => Err(format!("unknown code_challenge_method: {}", other)),
        }
    }
}

/// Client authentication method at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    ClientSecretPost,
    ClientSecretBasic,
    /// Public client; must use PKCE.
    None,
}

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Which relational/vector backend variant to construct at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Embedded,
    Networked,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "embedded" => Ok(BackendKind::Embedded),
            "networked" => Ok(BackendKind::Networked),
            other => Err(format!("unknown backend kind: {}", other)),
        }
    }
}

/// Which cache backend variant to construct at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    Memory,
    Networked,
}

impl FromStr for CacheKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheKind::Memory),
            "networked" => Ok(CacheKind::Networked),
            other => Err(format!("unknown cache kind: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Admin > Role::User);
        assert!(Role::User > Role::ReadOnly);
        assert!(Role::Admin.at_least(Role::ReadOnly));
        assert!(Role::User.at_least(Role::User));
        assert!(!Role::ReadOnly.at_least(Role::User));
        assert!(Role::Admin.can_cross_user());
        assert!(!Role::User.can_cross_user());
    }

    #[test]
    fn test_scope_round_trip() {
        for scope in [MemoryScope::Working, MemoryScope::Persistent] {
            let parsed: MemoryScope = scope.to_string().parse().expect("round trip");
            assert_eq!(parsed, scope);
        }
    }

    #[test]
    fn test_role_serde_snake_case() {
        let json = serde_json::to_string(&Role::ReadOnly).expect("serialize");
        assert_eq!(json, "\"read_only\"");
        let parsed: Role = serde_json::from_str("\"admin\"").expect("deserialize");
        assert_eq!(parsed, Role::Admin);
    }

    #[test]
    fn test_code_challenge_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&CodeChallengeMethod::S256).expect("serialize"),
            "\"S256\""
        );
        assert_eq!(
            serde_json::to_string(&CodeChallengeMethod::Plain).expect("serialize"),
            "\"plain\""
        );
    }
}
