//! Append-only audit log
//!
//! Every vault mutation, role change, API-key create/revoke, and OAuth2
//! client registration produces one row. Sensitive values are stored only
//! as SHA-256 hashes; the log can prove a value changed without revealing
//! it.

use std::sync::Arc;

use chrono::Utc;
use mnema_core::{
    compute_content_hash_hex, AccessError, AuditEvent, AuditEventId, EntityIdType, MnemaError,
    MnemaResult, OrderBy, Principal, Role, UserId,
};
use mnema_storage::{backend::tables, MemoryBackend, Query};

use crate::codec::{decode_row, encode_row};

/// Transport-level request context attached to audit rows.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Append-only audit log over the backend.
pub struct AuditLog {
    backend: Arc<dyn MemoryBackend>,
}

impl AuditLog {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }

    /// Record one audit event. Values are hashed before persistence.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        actor_user_id: UserId,
        actor_email: &str,
        action: &str,
        resource: &str,
        old_value: Option<&[u8]>,
        new_value: Option<&[u8]>,
        ctx: &RequestContext,
        metadata: Option<serde_json::Value>,
    ) -> MnemaResult<AuditEvent> {
        let event = AuditEvent {
            audit_event_id: AuditEventId::now_v7(),
            actor_user_id,
            actor_email: actor_email.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            old_value_hash: old_value.map(compute_content_hash_hex),
            new_value_hash: new_value.map(compute_content_hash_hex),
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            metadata,
            created_at: Utc::now(),
        };

        self.backend
            .put(
                tables::AUDIT_LOGS,
                event.audit_event_id.as_uuid(),
                encode_row(tables::AUDIT_LOGS, &event)?,
            )
            .await?;
        Ok(event)
    }

    /// List audit events, newest first. Admin-only.
    pub async fn list(
        &self,
        principal: Principal,
        limit: usize,
        offset: usize,
    ) -> MnemaResult<Vec<AuditEvent>> {
        if principal.role != Role::Admin {
            return Err(MnemaError::Access(AccessError::InsufficientRole {
                role: principal.role,
                required: Role::Admin,
            }));
        }

        let query = Query::default()
            .with_order(OrderBy::desc("created_at"))
            .with_limit(limit)
            .with_offset(offset);
        let rows = self.backend.query(tables::AUDIT_LOGS, &query).await?;
        rows.into_iter()
            .map(|row| decode_row(tables::AUDIT_LOGS, row))
            .collect()
    }
}
