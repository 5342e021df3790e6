//! External secret vault
//!
//! Third-party provider credentials (embedding keys, search keys) are
//! stored encrypted with AES-256-GCM under a process-wide key loaded from
//! the environment at startup. Each blob is `[12-byte nonce || ciphertext
//! + tag]` with a fresh random nonce per write. Plaintext exists only at
//! the moment of use and never reaches logs.

use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use chrono::Utc;
use mnema_core::{
    AccessError, EntityIdType, ExternalSecret, FilterExpr, MnemaError, MnemaResult, Principal,
    Role, SecretId, UserId, VaultError,
};
use mnema_storage::{backend::tables, MemoryBackend, Query, WriteOp};
use serde_json::json;

use crate::codec::{decode_row, encode_row};

/// AES-256-GCM nonce length (96 bits).
const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher over the process-wide vault key.
///
/// Constructed with `None` the cipher is locked: every encrypt/decrypt
/// fails with `VaultError::Locked` and the API surfaces the vault as
/// unavailable.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Option<Aes256Gcm>,
}

impl SecretCipher {
    /// Create a cipher from a 32-byte key. `None` produces a locked vault.
    pub fn new(master_key: Option<&[u8; 32]>) -> Self {
        let cipher = master_key.map(|k| {
            Aes256Gcm::new_from_slice(k).expect("32-byte key accepted by Aes256Gcm")
        });
        Self { cipher }
    }

    /// Build from a 64-hex-char key string (the `API_KEY_SECRET` format).
    /// Malformed input yields a locked vault rather than an error so the
    /// rest of the service can come up.
    pub fn from_hex(key_hex: Option<&str>) -> Self {
        let key_bytes = key_hex.and_then(|hex_str| {
            let cleaned = hex_str.trim();
            if cleaned.len() != 64 {
                tracing::warn!("vault key must be 64 hex chars (32 bytes); vault will be locked");
                return None;
            }
            hex::decode(cleaned).ok()?.try_into().ok()
        });
        match key_bytes {
            Some(key) => {
                tracing::info!("secret vault unlocked");
                Self::new(Some(&key))
            }
            None => {
                tracing::info!("secret vault locked (no valid key)");
                Self::new(None)
            }
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encrypt plaintext into `[nonce || ciphertext]`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let cipher = self.cipher.as_ref().ok_or(VaultError::Locked)?;
        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let ciphertext = cipher.encrypt(&nonce, plaintext).map_err(|e| {
            VaultError::EncryptionFailed {
                reason: e.to_string(),
            }
        })?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a blob previously produced by `encrypt`.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, VaultError> {
        let cipher = self.cipher.as_ref().ok_or(VaultError::Locked)?;
        if blob.len() < NONCE_LEN {
            return Err(VaultError::CorruptBlob);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher.decrypt(nonce, ciphertext).map_err(|e| {
            VaultError::DecryptionFailed {
                reason: e.to_string(),
            }
        })
    }

    /// Decrypt a blob to a UTF-8 string.
    pub fn decrypt_str(&self, blob: &[u8]) -> Result<String, VaultError> {
        let plaintext = self.decrypt(blob)?;
        String::from_utf8(plaintext).map_err(|e| VaultError::DecryptionFailed {
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("unlocked", &self.is_unlocked())
            .finish()
    }
}

/// Store for encrypted external secrets. Role checks live here because the
/// vault is system-owned, not user-owned.
pub struct VaultStore {
    backend: Arc<dyn MemoryBackend>,
    cipher: SecretCipher,
}

impl VaultStore {
    pub fn new(backend: Arc<dyn MemoryBackend>, cipher: SecretCipher) -> Self {
        Self { backend, cipher }
    }

    pub fn is_unlocked(&self) -> bool {
        self.cipher.is_unlocked()
    }

    fn require_admin(principal: Principal) -> MnemaResult<()> {
        if principal.role == Role::Admin {
            Ok(())
        } else {
            Err(MnemaError::Access(AccessError::InsufficientRole {
                role: principal.role,
                required: Role::Admin,
            }))
        }
    }

    async fn fetch_by_name(&self, key_name: &str) -> MnemaResult<Option<ExternalSecret>> {
        let query =
            Query::filtered(FilterExpr::eq("key_name", json!(key_name))).with_limit(1);
        let mut rows = self.backend.query(tables::EXTERNAL_API_KEYS, &query).await?;
        rows.pop()
            .map(|row| decode_row(tables::EXTERNAL_API_KEYS, row))
            .transpose()
    }

    /// Create or update a secret. Admin-only. Returns the stored row (the
    /// ciphertext field is never serialized outward).
    pub async fn set(
        &self,
        principal: Principal,
        actor: UserId,
        key_name: &str,
        provider_tag: &str,
        plaintext: &str,
    ) -> MnemaResult<ExternalSecret> {
        Self::require_admin(principal)?;
        if key_name.trim().is_empty() {
            return Err(MnemaError::Validation(
                mnema_core::ValidationError::RequiredFieldMissing {
                    field: "key_name".to_string(),
                },
            ));
        }

        let ciphertext = self.cipher.encrypt(plaintext.as_bytes())?;
        let existing = self.fetch_by_name(key_name).await?;

        let secret = ExternalSecret {
            secret_id: existing
                .as_ref()
                .map(|s| s.secret_id)
                .unwrap_or_else(SecretId::now_v7),
            key_name: key_name.to_string(),
            provider_tag: provider_tag.to_string(),
            ciphertext,
            updated_by: actor,
            updated_at: Utc::now(),
        };

        self.backend
            .upsert(
                tables::EXTERNAL_API_KEYS,
                secret.secret_id.as_uuid(),
                encode_row(tables::EXTERNAL_API_KEYS, &secret)?,
            )
            .await?;
        Ok(secret)
    }

    /// Decrypt a secret at the moment of use. Not exposed over any API
    /// surface; only internal callers (embedding gateway wiring) use it.
    pub async fn get_plaintext(&self, key_name: &str) -> MnemaResult<Option<String>> {
        let Some(secret) = self.fetch_by_name(key_name).await? else {
            return Ok(None);
        };
        Ok(Some(self.cipher.decrypt_str(&secret.ciphertext)?))
    }

    /// List secrets (metadata only). Admin-only.
    pub async fn list(&self, principal: Principal) -> MnemaResult<Vec<ExternalSecret>> {
        Self::require_admin(principal)?;
        let rows = self
            .backend
            .query(tables::EXTERNAL_API_KEYS, &Query::default())
            .await?;
        rows.into_iter()
            .map(|row| decode_row(tables::EXTERNAL_API_KEYS, row))
            .collect()
    }

    /// Delete a secret. Admin-only; idempotent.
    pub async fn delete(&self, principal: Principal, key_name: &str) -> MnemaResult<bool> {
        Self::require_admin(principal)?;
        let Some(secret) = self.fetch_by_name(key_name).await? else {
            return Ok(false);
        };
        self.backend
            .delete(tables::EXTERNAL_API_KEYS, secret.secret_id.as_uuid())
            .await
    }

    /// Rotate the vault key: decrypt every row with the old cipher and
    /// re-encrypt with the new one inside a single logical transaction.
    pub async fn rotate(
        &self,
        principal: Principal,
        old: &SecretCipher,
        new: &SecretCipher,
    ) -> MnemaResult<u64> {
        Self::require_admin(principal)?;

        let rows = self
            .backend
            .query(tables::EXTERNAL_API_KEYS, &Query::default())
            .await?;

        let mut ops = Vec::with_capacity(rows.len());
        for row in rows {
            let mut secret: ExternalSecret = decode_row(tables::EXTERNAL_API_KEYS, row)?;
            let plaintext = old.decrypt(&secret.ciphertext)?;
            secret.ciphertext = new.encrypt(&plaintext)?;
            secret.updated_at = Utc::now();
            ops.push(WriteOp::upsert(
                tables::EXTERNAL_API_KEYS,
                secret.secret_id.as_uuid(),
                encode_row(tables::EXTERNAL_API_KEYS, &secret)?,
            ));
        }

        let rotated = ops.len() as u64;
        self.backend.apply_batch(ops).await?;
        Ok(rotated)
    }
}
