//! External identity provider (OIDC) client
//!
//! Implements the server side of the login flow: build the authorization
//! redirect, exchange the returned code for tokens, and validate the id
//! token (issuer, audience, signature via the provider JWKS, expiration,
//! nonce). The provider endpoints come from the issuer's discovery
//! document, fetched once and cached.

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{ApiError, ApiResult};

/// IdP settings loaded from the environment.
#[derive(Clone)]
pub struct IdpConfig {
    pub client_id: String,
    pub client_secret: secrecy::SecretString,
    pub redirect_uri: String,
    pub issuer: String,
}

impl std::fmt::Debug for IdpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl IdpConfig {
    /// Build from `OAUTH_CLIENT_ID`, `OAUTH_CLIENT_SECRET`,
    /// `OAUTH_REDIRECT_URI`, `OAUTH_ISSUER`. Absent client id means SSO is
    /// disabled.
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var("OAUTH_CLIENT_ID").ok()?;
        Some(Self {
            client_id,
            client_secret: secrecy::SecretString::new(
                std::env::var("OAUTH_CLIENT_SECRET")
                    .unwrap_or_default()
                    .into(),
            ),
            redirect_uri: std::env::var("OAUTH_REDIRECT_URI")
                .unwrap_or_else(|_| "http://localhost:3000/auth/callback".to_string()),
            issuer: std::env::var("OAUTH_ISSUER")
                .unwrap_or_else(|_| "https://accounts.google.com".to_string()),
        })
    }
}

/// Discovery document fields Mnema needs.
#[derive(Debug, Clone, Deserialize)]
struct DiscoveryDocument {
    authorization_endpoint: String,
    token_endpoint: String,
    jwks_uri: String,
}

/// One JWK from the provider key set.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: String,
}

/// Identity claims extracted from a validated id token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: serde_json::Value,
    pub exp: i64,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub nonce: Option<String>,
}

/// OIDC client over the external IdP.
pub struct IdpClient {
    config: IdpConfig,
    http: reqwest::Client,
    discovery: RwLock<Option<Arc<DiscoveryDocument>>>,
    jwks: RwLock<HashMap<String, (String, String)>>,
}

impl IdpClient {
    pub fn new(config: IdpConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            discovery: RwLock::new(None),
            jwks: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &IdpConfig {
        &self.config
    }

    async fn discovery(&self) -> ApiResult<Arc<DiscoveryDocument>> {
        if let Some(doc) = self.discovery.read().await.clone() {
            return Ok(doc);
        }

        let url = format!(
            "{}/.well-known/openid-configuration",
            self.config.issuer.trim_end_matches('/')
        );
        let doc: DiscoveryDocument = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ApiError::dependency_unavailable(format!("IdP discovery failed: {}", e)))?
            .json()
            .await
            .map_err(|e| {
                ApiError::dependency_unavailable(format!("invalid IdP discovery document: {}", e))
            })?;

        let doc = Arc::new(doc);
        *self.discovery.write().await = Some(doc.clone());
        Ok(doc)
    }

    /// The authorization redirect URL with state and nonce bound in.
    pub async fn authorization_url(&self, state: &str, nonce: &str) -> ApiResult<String> {
        let doc = self.discovery().await?;
        Ok(format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&nonce={}",
            doc.authorization_endpoint,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode("openid email profile"),
            urlencoding::encode(state),
            urlencoding::encode(nonce),
        ))
    }

    /// Exchange an authorization code and validate the returned id token.
    pub async fn exchange_code(
        &self,
        code: &str,
        expected_nonce: &str,
    ) -> ApiResult<IdTokenClaims> {
        use secrecy::ExposeSecret as _;

        let doc = self.discovery().await?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
        ];

        let response = self
            .http
            .post(&doc.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ApiError::dependency_unavailable(format!("IdP token exchange failed: {}", e))
            })?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::unauthorized(format!(
                "IdP rejected the authorization code: {}",
                body
            )));
        }

        let tokens: TokenResponse = response.json().await.map_err(|e| {
            ApiError::dependency_unavailable(format!("invalid IdP token response: {}", e))
        })?;

        self.validate_id_token(&tokens.id_token, expected_nonce)
            .await
    }

    async fn key_components(&self, kid: &str) -> ApiResult<(String, String)> {
        if let Some(components) = self.jwks.read().await.get(kid).cloned() {
            return Ok(components);
        }

        // Refresh the key set (also picks up provider key rotation).
        let doc = self.discovery().await?;
        let set: JwkSet = self
            .http
            .get(&doc.jwks_uri)
            .send()
            .await
            .map_err(|e| ApiError::dependency_unavailable(format!("JWKS fetch failed: {}", e)))?
            .json()
            .await
            .map_err(|e| ApiError::dependency_unavailable(format!("invalid JWKS: {}", e)))?;

        let mut cache = self.jwks.write().await;
        cache.clear();
        for key in set.keys {
            if let (Some(kid), Some(n), Some(e)) = (key.kid, key.n, key.e) {
                cache.insert(kid, (n, e));
            }
        }
        cache
            .get(kid)
            .cloned()
            .ok_or_else(|| ApiError::invalid_token("id token signed with unknown key"))
    }

    /// Validate issuer, audience, signature, expiration, and nonce.
    pub async fn validate_id_token(
        &self,
        id_token: &str,
        expected_nonce: &str,
    ) -> ApiResult<IdTokenClaims> {
        let header = decode_header(id_token)
            .map_err(|e| ApiError::invalid_token(format!("malformed id token: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| ApiError::invalid_token("id token missing kid"))?;
        let (n, e) = self.key_components(&kid).await?;

        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|err| ApiError::invalid_token(format!("invalid JWKS key: {}", err)))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.config.issuer.trim_end_matches('/')]);
        validation.set_audience(&[self.config.client_id.as_str()]);

        let data = decode::<IdTokenClaims>(id_token, &decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::token_expired(),
                _ => ApiError::invalid_token(format!("id token validation failed: {}", e)),
            }
        })?;

        let claims = data.claims;
        match &claims.nonce {
            Some(nonce) if nonce == expected_nonce => Ok(claims),
            Some(_) => Err(ApiError::invalid_token("id token nonce mismatch")),
            None => Err(ApiError::invalid_token("id token missing nonce")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idp_config_debug_redacts_secret() {
        let config = IdpConfig {
            client_id: "client".to_string(),
            client_secret: secrecy::SecretString::new("hunter2".to_string().into()),
            redirect_uri: "http://localhost/cb".to_string(),
            issuer: "https://idp.example".to_string(),
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
