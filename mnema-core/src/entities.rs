//! Core entity structures

use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Memory - an opaque text payload plus metadata, addressed by
/// `(owner_user_id, agent_name, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MemoryRecord {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub memory_id: MemoryId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub owner_user_id: UserId,
    pub agent_name: String,
    pub key: String,
    pub value: String,
    pub scope: MemoryScope,
    pub kind: MemoryKind,
    /// Importance in [0, 1]. Clamped on ingress.
    pub importance: f64,
    /// Normalized tags: trimmed, lowercased, deduplicated.
    pub tags: Vec<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<serde_json::Value>,
    /// Whether this memory is (or should be) represented in the vector
    /// index. Drives re-embedding when the value changes.
    pub has_embedding: bool,
    /// Set when the durable row is ahead of the vector index; the
    /// reconciler clears it after a successful re-embed.
    pub needs_reindex: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub last_accessed_at: Timestamp,
    pub access_count: i64,
}

impl MemoryRecord {
    /// The vector-index attribute payload copied alongside the embedding.
    pub fn index_attrs(&self) -> VectorAttrs {
        VectorAttrs {
            owner_user_id: self.owner_user_id,
            agent_name: self.agent_name.clone(),
            tags: self.tags.clone(),
            scope: self.scope,
            kind: self.kind,
            importance: self.importance,
        }
    }
}

/// Filterable attributes stored next to each embedding in the vector index.
/// Must stay consistent with the memory row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct VectorAttrs {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub owner_user_id: UserId,
    pub agent_name: String,
    pub tags: Vec<String>,
    pub scope: MemoryScope,
    pub kind: MemoryKind,
    pub importance: f64,
}

/// Graph node - entity in the per-owner knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GraphNode {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub node_id: NodeId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub owner_user_id: UserId,
    pub node_type: String,
    /// Optional back-reference to a memory record. Cleared (not cascaded)
    /// when the memory is deleted.
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub memory_ref: Option<MemoryId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub attrs: Option<serde_json::Value>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

/// Graph edge - directed, typed relation between two nodes of one owner.
/// An undirected relation is modeled as two edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GraphEdge {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub edge_id: EdgeId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub owner_user_id: UserId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub src: NodeId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub dst: NodeId,
    pub relation_type: String,
    pub weight: f64,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub valid_from: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub valid_until: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub attrs: Option<serde_json::Value>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl GraphEdge {
    /// Whether this edge is valid at the given instant.
    pub fn valid_at(&self, at: Timestamp) -> bool {
        if let Some(from) = self.valid_from {
            if at < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if at >= until {
                return false;
            }
        }
        true
    }
}

/// User provisioned from the external identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct User {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub user_id: UserId,
    /// Stable subject identifier issued by the IdP.
    pub external_subject: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

/// The authenticated actor behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Resolve the effective owner for an operation. Admins may name an
    /// explicit target user; everyone else is pinned to themselves.
    pub fn effective_owner(&self, target: Option<UserId>) -> Result<UserId, AccessError> {
        match target {
            Some(t) if t != self.user_id => {
                if self.role.can_cross_user() {
                    Ok(t)
                } else {
                    Err(AccessError::CrossUserDenied { target: t })
                }
            }
            _ => Ok(self.user_id),
        }
    }
}

/// API key row. The plaintext is never persisted; lookup is by `key_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiKeyRecord {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub api_key_id: ApiKeyId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub owner_user_id: UserId,
    pub name: String,
    /// First characters of the plaintext, kept for identification in lists.
    pub key_prefix: String,
    /// Hex-encoded SHA-256 of the plaintext. Storage rows carry it; the
    /// API layer exposes keys through response types that omit it.
    pub key_hash: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub last_used_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub revoked_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub expires_at: Option<Timestamp>,
}

impl ApiKeyRecord {
    /// A key is valid iff it is not revoked and not past its expiry.
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Registered OAuth2 client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct OauthClient {
    pub client_id: String,
    /// Hex-encoded SHA-256 of the client secret; None for public clients.
    pub client_secret_hash: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scope: String,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

impl OauthClient {
    /// Public clients carry no secret and must use PKCE.
    pub fn is_public(&self) -> bool {
        matches!(
            self.token_endpoint_auth_method,
            TokenEndpointAuthMethod::None
        )
    }

    pub fn allows_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|r| r == uri)
    }
}

/// Short-lived authorization code. Single-use; deleted on exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: UserId,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub auth_time: Timestamp,
    pub expires_at: Timestamp,
}

impl AuthorizationCode {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

/// Issued OAuth2 access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OauthToken {
    pub token_id: TokenId,
    /// Shared across every token issued from the same authorization;
    /// refresh-token reuse revokes the whole chain.
    pub chain_id: TokenId,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub user_id: UserId,
    pub scope: String,
    pub issued_at: Timestamp,
    pub expires_in: i64,
    /// Global kill switch for the whole token chain.
    pub revoked: bool,
    pub access_revoked_at: Option<Timestamp>,
    pub refresh_revoked_at: Option<Timestamp>,
}

impl OauthToken {
    pub fn access_valid_at(&self, now: Timestamp) -> bool {
        !self.revoked
            && self.access_revoked_at.is_none()
            && now < self.issued_at + chrono::Duration::seconds(self.expires_in)
    }

    pub fn refresh_valid(&self) -> bool {
        !self.revoked && self.refresh_revoked_at.is_none() && self.refresh_token.is_some()
    }
}

/// Encrypted third-party credential owned by the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExternalSecret {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub secret_id: SecretId,
    /// Unique lookup name, e.g. "openai_api_key".
    pub key_name: String,
    pub provider_tag: String,
    /// Nonce-prefixed AES-256-GCM blob; response types never include it.
    pub ciphertext: Vec<u8>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub updated_by: UserId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

/// Append-only audit row. Values are stored only as hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuditEvent {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub audit_event_id: AuditEventId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub actor_user_id: UserId,
    pub actor_email: String,
    pub action: String,
    pub resource: String,
    pub old_value_hash: Option<String>,
    pub new_value_hash: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub metadata: Option<serde_json::Value>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

/// Server-side session row kept in the cache under `session:{token}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: UserId,
    /// Synchronizer token for CSRF defense on cookie-authenticated writes.
    pub csrf_token: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Aggregate statistics over a principal's memories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MemoryStats {
    pub total: u64,
    pub working: u64,
    pub persistent: u64,
    pub total_value_bytes: u64,
    pub average_importance: f64,
    pub distinct_agents: u64,
    /// Tag -> occurrence count.
    pub tag_histogram: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_api_key_validity() {
        let now = Utc::now();
        let mut key = ApiKeyRecord {
            api_key_id: ApiKeyId::now_v7(),
            owner_user_id: UserId::now_v7(),
            name: "ci".to_string(),
            key_prefix: "kg_abcd".to_string(),
            key_hash: "00".repeat(32),
            created_at: now,
            last_used_at: None,
            revoked_at: None,
            expires_at: None,
        };
        assert!(key.is_valid_at(now));

        key.expires_at = Some(now + Duration::days(1));
        assert!(key.is_valid_at(now));

        key.expires_at = Some(now - Duration::seconds(1));
        assert!(!key.is_valid_at(now));

        key.expires_at = None;
        key.revoked_at = Some(now);
        assert!(!key.is_valid_at(now));
    }

    #[test]
    fn test_edge_temporal_validity() {
        let now = Utc::now();
        let edge = GraphEdge {
            edge_id: EdgeId::now_v7(),
            owner_user_id: UserId::now_v7(),
            src: NodeId::now_v7(),
            dst: NodeId::now_v7(),
            relation_type: "depends_on".to_string(),
            weight: 1.0,
            valid_from: Some(now - Duration::hours(1)),
            valid_until: Some(now + Duration::hours(1)),
            attrs: None,
            created_at: now,
        };

        assert!(edge.valid_at(now));
        assert!(!edge.valid_at(now - Duration::hours(2)));
        assert!(!edge.valid_at(now + Duration::hours(2)));
    }

    #[test]
    fn test_principal_effective_owner() {
        let admin = Principal::new(UserId::now_v7(), Role::Admin);
        let user = Principal::new(UserId::now_v7(), Role::User);
        let other = UserId::now_v7();

        assert_eq!(admin.effective_owner(None), Ok(admin.user_id));
        assert_eq!(admin.effective_owner(Some(other)), Ok(other));
        assert_eq!(user.effective_owner(None), Ok(user.user_id));
        assert_eq!(user.effective_owner(Some(user.user_id)), Ok(user.user_id));
        assert_eq!(
            user.effective_owner(Some(other)),
            Err(AccessError::CrossUserDenied { target: other })
        );
    }

    #[test]
    fn test_oauth_token_lifetimes() {
        let now = Utc::now();
        let token = OauthToken {
            token_id: TokenId::now_v7(),
            chain_id: TokenId::now_v7(),
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            client_id: "client".to_string(),
            user_id: UserId::now_v7(),
            scope: "memories".to_string(),
            issued_at: now,
            expires_in: 3600,
            revoked: false,
            access_revoked_at: None,
            refresh_revoked_at: None,
        };

        assert!(token.access_valid_at(now + Duration::seconds(3599)));
        assert!(!token.access_valid_at(now + Duration::seconds(3601)));
        assert!(token.refresh_valid());

        let revoked = OauthToken {
            revoked: true,
            ..token
        };
        assert!(!revoked.access_valid_at(now));
        assert!(!revoked.refresh_valid());
    }

    #[test]
    fn test_api_key_row_round_trip_keeps_hash() {
        let key = ApiKeyRecord {
            api_key_id: ApiKeyId::now_v7(),
            owner_user_id: UserId::now_v7(),
            name: "ci".to_string(),
            key_prefix: "kg_abcd".to_string(),
            key_hash: "deadbeef".to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            revoked_at: None,
            expires_at: None,
        };
        let row = serde_json::to_value(&key).expect("serialize");
        let decoded: ApiKeyRecord = serde_json::from_value(row).expect("deserialize");
        assert_eq!(decoded.key_hash, "deadbeef");
        assert_eq!(decoded.key_prefix, "kg_abcd");
    }
}
