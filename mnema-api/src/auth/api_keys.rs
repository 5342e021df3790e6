//! API key subsystem
//!
//! Keys are `kg_` + 32 random bytes (URL-safe base64). The plaintext is
//! returned exactly once at creation; only the SHA-256 hash and a short
//! prefix are persisted. Verification hashes the presented token and looks
//! the row up by hash, then checks revocation and expiry. Usage is tracked
//! best-effort: `last_used_at` on the row and a per-day counter in the
//! cache with a rolling 30-day TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use mnema_core::{
    compute_content_hash_hex, ApiKeyId, ApiKeyRecord, EntityIdType, FilterExpr, MnemaError,
    MnemaResult, Principal, StorageError, User, UserId,
};
use mnema_storage::{apikey_stats_key, backend::tables, CacheBackend, MemoryBackend, Query};
use serde_json::json;

use super::generate_opaque_token;

/// Prefix carried by every Mnema API key.
pub const KEY_PREFIX: &str = "kg_";

/// Rolling TTL for per-day usage counters.
const USAGE_COUNTER_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Length of the stored identification prefix (includes `kg_`).
const STORED_PREFIX_CHARS: usize = 8;

/// Store for API keys.
pub struct ApiKeyStore {
    backend: Arc<dyn MemoryBackend>,
    cache: Arc<dyn CacheBackend>,
}

impl ApiKeyStore {
    pub fn new(backend: Arc<dyn MemoryBackend>, cache: Arc<dyn CacheBackend>) -> Self {
        Self { backend, cache }
    }

    fn decode(row: serde_json::Value) -> MnemaResult<ApiKeyRecord> {
        serde_json::from_value(row).map_err(|e| {
            MnemaError::Storage(StorageError::Corrupt {
                table: tables::API_KEYS.to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn encode(record: &ApiKeyRecord) -> MnemaResult<serde_json::Value> {
        serde_json::to_value(record).map_err(|e| {
            MnemaError::Storage(StorageError::Corrupt {
                table: tables::API_KEYS.to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Create a key for the principal. Returns `(plaintext, record)` — the
    /// only time the plaintext exists outside the caller's hands.
    pub async fn create(
        &self,
        principal: Principal,
        name: &str,
        expires_days: Option<i64>,
    ) -> MnemaResult<(String, ApiKeyRecord)> {
        let plaintext = format!("{}{}", KEY_PREFIX, generate_opaque_token());
        let now = Utc::now();

        let record = ApiKeyRecord {
            api_key_id: ApiKeyId::now_v7(),
            owner_user_id: principal.user_id,
            name: name.to_string(),
            key_prefix: plaintext.chars().take(STORED_PREFIX_CHARS).collect(),
            key_hash: compute_content_hash_hex(plaintext.as_bytes()),
            created_at: now,
            last_used_at: None,
            revoked_at: None,
            expires_at: expires_days.map(|d| now + ChronoDuration::days(d)),
        };

        self.backend
            .put(
                tables::API_KEYS,
                record.api_key_id.as_uuid(),
                Self::encode(&record)?,
            )
            .await?;
        Ok((plaintext, record))
    }

    /// List the principal's keys (hashes never leave the store).
    pub async fn list(&self, principal: Principal) -> MnemaResult<Vec<ApiKeyRecord>> {
        let query = Query::filtered(FilterExpr::eq(
            "owner_user_id",
            json!(principal.user_id.to_string()),
        ));
        let rows = self.backend.query(tables::API_KEYS, &query).await?;
        rows.into_iter().map(Self::decode).collect()
    }

    /// Revoke a key owned by the principal (admins may revoke any).
    /// Returns the revoked record.
    pub async fn revoke(
        &self,
        principal: Principal,
        api_key_id: ApiKeyId,
    ) -> MnemaResult<ApiKeyRecord> {
        let row = self
            .backend
            .get(tables::API_KEYS, api_key_id.as_uuid())
            .await?
            .ok_or_else(|| {
                MnemaError::Storage(StorageError::NotFound {
                    table: tables::API_KEYS.to_string(),
                    id: api_key_id.to_string(),
                })
            })?;
        let mut record = Self::decode(row)?;

        if record.owner_user_id != principal.user_id && !principal.role.can_cross_user() {
            // Hide other users' keys entirely.
            return Err(MnemaError::Storage(StorageError::NotFound {
                table: tables::API_KEYS.to_string(),
                id: api_key_id.to_string(),
            }));
        }

        if record.revoked_at.is_none() {
            record.revoked_at = Some(Utc::now());
            self.backend
                .upsert(
                    tables::API_KEYS,
                    record.api_key_id.as_uuid(),
                    Self::encode(&record)?,
                )
                .await?;
        }
        Ok(record)
    }

    /// Verify a presented bearer. Returns the owning user on success.
    pub async fn verify(&self, presented: &str) -> MnemaResult<Option<UserId>> {
        if !presented.starts_with(KEY_PREFIX) {
            return Ok(None);
        }
        let hash = compute_content_hash_hex(presented.as_bytes());

        let query = Query::filtered(FilterExpr::eq("key_hash", json!(hash))).with_limit(1);
        let mut rows = self.backend.query(tables::API_KEYS, &query).await?;
        let Some(row) = rows.pop() else {
            return Ok(None);
        };
        let mut record = Self::decode(row)?;

        if !record.is_valid_at(Utc::now()) {
            return Ok(None);
        }

        // Best-effort usage bookkeeping; failures never fail the request.
        record.last_used_at = Some(Utc::now());
        let owner = record.owner_user_id;
        if let Ok(encoded) = Self::encode(&record) {
            if let Err(e) = self
                .backend
                .upsert(tables::API_KEYS, record.api_key_id.as_uuid(), encoded)
                .await
            {
                tracing::debug!(error = %e, "api key last_used_at update failed");
            }
        }
        let counter_key = apikey_stats_key(&record.key_hash, Utc::now().date_naive());
        if let Err(e) = self.cache.incr(&counter_key, Some(USAGE_COUNTER_TTL)).await {
            tracing::debug!(error = %e, "api key usage counter failed");
        }

        Ok(Some(owner))
    }

    /// Today's usage count for a key (admin/debug surfaces).
    pub async fn usage_today(&self, record: &ApiKeyRecord) -> MnemaResult<i64> {
        let key = apikey_stats_key(&record.key_hash, Utc::now().date_naive());
        match self.cache.get_raw(&key).await? {
            Some(bytes) => Ok(std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)),
            None => Ok(0),
        }
    }
}

/// Resolve the principal for a verified key owner.
pub fn principal_for(user: &User) -> Principal {
    Principal::new(user.user_id, user.role)
}
