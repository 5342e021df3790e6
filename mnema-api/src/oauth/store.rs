//! Persistence for OAuth2 clients, authorization codes, and tokens
//!
//! Codes and tokens are keyed by deterministic UUIDv5 of their opaque
//! string, so lookup by the presented value is a point read without a
//! secondary index.

use std::sync::Arc;

use mnema_core::{
    AuthorizationCode, MnemaError, MnemaResult, OauthClient, OauthToken, StorageError,
};
use mnema_storage::{backend::tables, MemoryBackend};
use uuid::Uuid;

/// Namespace for deriving row ids from opaque token strings.
const TOKEN_NS: Uuid = Uuid::from_bytes([
    0x6d, 0x6e, 0x65, 0x6d, 0x61, 0x2d, 0x6f, 0x61, 0x75, 0x74, 0x68, 0x2d, 0x72, 0x6f, 0x77,
    0x73,
]);

fn row_id(kind: &str, value: &str) -> Uuid {
    Uuid::new_v5(&TOKEN_NS, format!("{}:{}", kind, value).as_bytes())
}

fn decode<T: serde::de::DeserializeOwned>(table: &str, row: serde_json::Value) -> MnemaResult<T> {
    serde_json::from_value(row).map_err(|e| {
        MnemaError::Storage(StorageError::Corrupt {
            table: table.to_string(),
            reason: e.to_string(),
        })
    })
}

fn encode<T: serde::Serialize>(table: &str, value: &T) -> MnemaResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| {
        MnemaError::Storage(StorageError::Corrupt {
            table: table.to_string(),
            reason: e.to_string(),
        })
    })
}

/// Store for the authorization server's durable state.
pub struct OauthStore {
    backend: Arc<dyn MemoryBackend>,
}

impl OauthStore {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }

    // ========================================================================
    // CLIENTS
    // ========================================================================

    pub async fn put_client(&self, client: &OauthClient) -> MnemaResult<()> {
        self.backend
            .upsert(
                tables::OAUTH_CLIENTS,
                row_id("client", &client.client_id),
                encode(tables::OAUTH_CLIENTS, client)?,
            )
            .await
    }

    pub async fn get_client(&self, client_id: &str) -> MnemaResult<Option<OauthClient>> {
        let row = self
            .backend
            .get(tables::OAUTH_CLIENTS, row_id("client", client_id))
            .await?;
        row.map(|r| decode(tables::OAUTH_CLIENTS, r)).transpose()
    }

    // ========================================================================
    // AUTHORIZATION CODES
    // ========================================================================

    pub async fn put_code(&self, code: &AuthorizationCode) -> MnemaResult<()> {
        self.backend
            .put(
                tables::OAUTH_AUTHORIZATION_CODES,
                row_id("code", &code.code),
                encode(tables::OAUTH_AUTHORIZATION_CODES, code)?,
            )
            .await
    }

    /// Fetch AND delete a code in one step: codes are single-use, and the
    /// delete-on-read makes replay of a successful exchange impossible.
    pub async fn take_code(&self, code: &str) -> MnemaResult<Option<AuthorizationCode>> {
        let id = row_id("code", code);
        let row = self
            .backend
            .get(tables::OAUTH_AUTHORIZATION_CODES, id)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        self.backend
            .delete(tables::OAUTH_AUTHORIZATION_CODES, id)
            .await?;
        Ok(Some(decode(tables::OAUTH_AUTHORIZATION_CODES, row)?))
    }

    // ========================================================================
    // TOKENS
    // ========================================================================

    /// Persist a token row, indexed by access token, and by refresh token
    /// when present (alias row pointing at the same payload).
    pub async fn put_token(&self, token: &OauthToken) -> MnemaResult<()> {
        let row = encode(tables::OAUTH_TOKENS, token)?;
        self.backend
            .upsert(
                tables::OAUTH_TOKENS,
                row_id("access", &token.access_token),
                row.clone(),
            )
            .await?;
        if let Some(refresh) = &token.refresh_token {
            self.backend
                .upsert(tables::OAUTH_TOKENS, row_id("refresh", refresh), row)
                .await?;
        }
        Ok(())
    }

    pub async fn get_by_access(&self, access_token: &str) -> MnemaResult<Option<OauthToken>> {
        let row = self
            .backend
            .get(tables::OAUTH_TOKENS, row_id("access", access_token))
            .await?;
        row.map(|r| decode(tables::OAUTH_TOKENS, r)).transpose()
    }

    pub async fn get_by_refresh(&self, refresh_token: &str) -> MnemaResult<Option<OauthToken>> {
        let row = self
            .backend
            .get(tables::OAUTH_TOKENS, row_id("refresh", refresh_token))
            .await?;
        row.map(|r| decode(tables::OAUTH_TOKENS, r)).transpose()
    }

    /// Update both index rows for a token.
    pub async fn update_token(&self, token: &OauthToken) -> MnemaResult<()> {
        self.put_token(token).await
    }

    /// Revoke every token in a chain (refresh-reuse response).
    pub async fn revoke_chain(&self, chain_id: mnema_core::TokenId) -> MnemaResult<u64> {
        use mnema_core::FilterExpr;
        use serde_json::json;

        let query = mnema_storage::Query::filtered(FilterExpr::eq(
            "chain_id",
            json!(chain_id.to_string()),
        ));
        let rows = self.backend.query(tables::OAUTH_TOKENS, &query).await?;
        let mut revoked = 0;
        for row in rows {
            let mut token: OauthToken = decode(tables::OAUTH_TOKENS, row)?;
            if !token.revoked {
                token.revoked = true;
                self.update_token(&token).await?;
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}
