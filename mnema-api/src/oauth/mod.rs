//! OAuth2 authorization server
//!
//! Authorization-code grant with PKCE (S256 and plain) and rotating refresh
//! tokens. Public clients must use PKCE. Codes are single-use and expire
//! after ten minutes; refresh-token reuse revokes the entire token chain.
//! Errors use the RFC 6749 wire vocabulary, separate from the REST error
//! taxonomy.

pub mod pkce;
pub mod store;

pub use store::OauthStore;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use mnema_core::{
    compute_content_hash_hex, AuthorizationCode, CodeChallengeMethod, EntityIdType, MnemaResult,
    OauthClient, OauthToken, TokenEndpointAuthMethod, TokenId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::auth::generate_opaque_token;

/// Authorization code lifetime (RFC recommends at most 10 minutes).
const CODE_TTL_MINUTES: i64 = 10;

// ============================================================================
// WIRE ERRORS (RFC 6749 §5.2)
// ============================================================================

/// OAuth2 token-endpoint error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct OauthWireError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl OauthWireError {
    pub fn new(error: &str, description: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            error_description: Some(description.into()),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new("invalid_request", description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new("invalid_client", description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new("invalid_grant", description)
    }

    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::new("unsupported_grant_type", description)
    }

    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new("server_error", description)
    }

    fn status(&self) -> StatusCode {
        match self.error.as_str() {
            "invalid_client" => StatusCode::UNAUTHORIZED,
            "server_error" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for OauthWireError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<mnema_core::MnemaError> for OauthWireError {
    fn from(err: mnema_core::MnemaError) -> Self {
        tracing::error!(error = %err, "oauth storage failure");
        Self::server_error("temporary failure")
    }
}

pub type OauthResult<T> = Result<T, OauthWireError>;

// ============================================================================
// REQUEST / RESPONSE SHAPES
// ============================================================================

/// Parameters accepted at `/oauth/authorize`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

/// Form body accepted at `/oauth/token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenParams {
    pub grant_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub code_verifier: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Successful token response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

/// Form body accepted at `/oauth/revoke` (RFC 7009).
#[derive(Debug, Clone, Deserialize)]
pub struct RevokeParams {
    pub token: String,
    #[serde(default)]
    pub token_type_hint: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Client registration request (admin surface).
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegisterClientRequest {
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Client registration response; the secret appears exactly once.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegisterClientResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    pub scope: String,
}

// ============================================================================
// AUTHORIZATION SERVER
// ============================================================================

/// The authorization server over its durable store.
pub struct AuthorizationServer {
    store: OauthStore,
    access_token_ttl_secs: i64,
}

impl AuthorizationServer {
    pub fn new(store: OauthStore, access_token_ttl_secs: i64) -> Self {
        Self {
            store,
            access_token_ttl_secs,
        }
    }

    // ========================================================================
    // CLIENT REGISTRATION
    // ========================================================================

    /// Register a client. Confidential clients get a generated secret,
    /// returned exactly once.
    pub async fn register_client(
        &self,
        req: RegisterClientRequest,
    ) -> MnemaResult<RegisterClientResponse> {
        let client_id = format!("mc_{}", generate_opaque_token());
        let scope = req.scope.unwrap_or_else(|| "memories".to_string());

        let (client_secret, client_secret_hash) = match req.token_endpoint_auth_method {
            TokenEndpointAuthMethod::None => (None, None),
            _ => {
                let secret = generate_opaque_token();
                let hash = compute_content_hash_hex(secret.as_bytes());
                (Some(secret), Some(hash))
            }
        };

        let client = OauthClient {
            client_id: client_id.clone(),
            client_secret_hash,
            name: req.name.clone(),
            redirect_uris: req.redirect_uris.clone(),
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            scope: scope.clone(),
            token_endpoint_auth_method: req.token_endpoint_auth_method,
            created_at: Utc::now(),
        };
        self.store.put_client(&client).await?;

        Ok(RegisterClientResponse {
            client_id,
            client_secret,
            name: req.name,
            redirect_uris: req.redirect_uris,
            token_endpoint_auth_method: req.token_endpoint_auth_method,
            scope,
        })
    }

    // ========================================================================
    // AUTHORIZE
    // ========================================================================

    /// Issue an authorization code for an authenticated user. Returns the
    /// full redirect URL.
    pub async fn authorize(&self, user_id: UserId, params: AuthorizeParams) -> OauthResult<String> {
        if params.response_type != "code" {
            return Err(OauthWireError::new(
                "unsupported_response_type",
                "only response_type=code is supported",
            ));
        }

        let client = self
            .store
            .get_client(&params.client_id)
            .await?
            .ok_or_else(|| OauthWireError::invalid_client("unknown client_id"))?;

        // Delivery must go to one of the registered redirect URIs.
        if !client.allows_redirect_uri(&params.redirect_uri) {
            return Err(OauthWireError::invalid_request(
                "redirect_uri is not registered for this client",
            ));
        }

        let code_challenge_method = match params.code_challenge_method.as_deref() {
            Some(raw) => Some(raw.parse::<CodeChallengeMethod>().map_err(|e| {
                OauthWireError::invalid_request(e)
            })?),
            None if params.code_challenge.is_some() => Some(CodeChallengeMethod::Plain),
            None => None,
        };

        // Public clients must use PKCE.
        if client.is_public() && params.code_challenge.is_none() {
            return Err(OauthWireError::invalid_request(
                "public clients must supply a PKCE code_challenge",
            ));
        }

        let now = Utc::now();
        let code = AuthorizationCode {
            code: generate_opaque_token(),
            client_id: client.client_id.clone(),
            user_id,
            redirect_uri: params.redirect_uri.clone(),
            scope: params.scope.unwrap_or_else(|| client.scope.clone()),
            code_challenge: params.code_challenge,
            code_challenge_method,
            auth_time: now,
            expires_at: now + ChronoDuration::minutes(CODE_TTL_MINUTES),
        };
        self.store.put_code(&code).await?;

        let separator = if params.redirect_uri.contains('?') { '&' } else { '?' };
        let mut location = format!(
            "{}{}code={}",
            params.redirect_uri,
            separator,
            urlencoding::encode(&code.code)
        );
        if let Some(state) = params.state {
            location.push_str(&format!("&state={}", urlencoding::encode(&state)));
        }
        Ok(location)
    }

    // ========================================================================
    // TOKEN
    // ========================================================================

    /// `/oauth/token` entry point. `basic_auth` carries credentials from an
    /// HTTP Basic header when present.
    pub async fn token(
        &self,
        params: TokenParams,
        basic_auth: Option<(String, String)>,
    ) -> OauthResult<TokenGrant> {
        match params.grant_type.as_str() {
            "authorization_code" => self.exchange_code(params, basic_auth).await,
            "refresh_token" => self.refresh(params, basic_auth).await,
            other => Err(OauthWireError::unsupported_grant_type(format!(
                "unsupported grant_type {}",
                other
            ))),
        }
    }

    /// Resolve and authenticate the client for a token request.
    async fn authenticate_client(
        &self,
        params: &TokenParams,
        basic_auth: Option<(String, String)>,
    ) -> OauthResult<OauthClient> {
        // client_secret_basic takes precedence over client_secret_post.
        let (client_id, client_secret) = match basic_auth {
            Some((id, secret)) => (Some(id), Some(secret)),
            None => (params.client_id.clone(), params.client_secret.clone()),
        };

        let client_id =
            client_id.ok_or_else(|| OauthWireError::invalid_client("missing client_id"))?;
        let client = self
            .store
            .get_client(&client_id)
            .await?
            .ok_or_else(|| OauthWireError::invalid_client("unknown client_id"))?;

        match client.token_endpoint_auth_method {
            TokenEndpointAuthMethod::None => Ok(client),
            TokenEndpointAuthMethod::ClientSecretBasic
            | TokenEndpointAuthMethod::ClientSecretPost => {
                let presented = client_secret
                    .ok_or_else(|| OauthWireError::invalid_client("missing client_secret"))?;
                let hash = compute_content_hash_hex(presented.as_bytes());
                if client.client_secret_hash.as_deref() == Some(hash.as_str()) {
                    Ok(client)
                } else {
                    Err(OauthWireError::invalid_client("bad client credentials"))
                }
            }
        }
    }

    async fn exchange_code(
        &self,
        params: TokenParams,
        basic_auth: Option<(String, String)>,
    ) -> OauthResult<TokenGrant> {
        let client = self.authenticate_client(&params, basic_auth).await?;
        let code_value = params
            .code
            .as_deref()
            .ok_or_else(|| OauthWireError::invalid_request("missing code"))?;

        // Single-use: the code row is deleted on this read. Any later
        // exchange of the same code lands here with None.
        let code = self
            .store
            .take_code(code_value)
            .await?
            .ok_or_else(|| OauthWireError::invalid_grant("unknown or already used code"))?;

        if code.client_id != client.client_id {
            return Err(OauthWireError::invalid_grant("code issued to another client"));
        }
        if code.is_expired_at(Utc::now()) {
            return Err(OauthWireError::invalid_grant("code expired"));
        }
        // The redirect_uri presented here must equal the one presented at
        // the authorize endpoint.
        if params.redirect_uri.as_deref() != Some(code.redirect_uri.as_str()) {
            return Err(OauthWireError::invalid_grant("redirect_uri mismatch"));
        }

        // PKCE verification under the stored challenge's declared method.
        match (&code.code_challenge, &code.code_challenge_method) {
            (Some(challenge), Some(method)) => {
                let verifier = params
                    .code_verifier
                    .as_deref()
                    .ok_or_else(|| OauthWireError::invalid_grant("missing code_verifier"))?;
                if !pkce::verifier_is_well_formed(verifier)
                    || !pkce::verify(*method, challenge, verifier)
                {
                    return Err(OauthWireError::invalid_grant("PKCE verification failed"));
                }
            }
            _ if client.is_public() => {
                return Err(OauthWireError::invalid_grant(
                    "public client code issued without PKCE",
                ));
            }
            _ => {}
        }

        let token = self
            .issue_token(&client, code.user_id, &code.scope, TokenId::now_v7())
            .await?;
        Ok(token)
    }

    async fn refresh(
        &self,
        params: TokenParams,
        basic_auth: Option<(String, String)>,
    ) -> OauthResult<TokenGrant> {
        let client = self.authenticate_client(&params, basic_auth).await?;
        let refresh_value = params
            .refresh_token
            .as_deref()
            .ok_or_else(|| OauthWireError::invalid_request("missing refresh_token"))?;

        let mut current = self
            .store
            .get_by_refresh(refresh_value)
            .await?
            .ok_or_else(|| OauthWireError::invalid_grant("unknown refresh token"))?;

        if current.client_id != client.client_id {
            return Err(OauthWireError::invalid_grant(
                "refresh token issued to another client",
            ));
        }

        // Reuse of a rotated (revoked) refresh token is a theft signal:
        // revoke the entire chain.
        if !current.refresh_valid() {
            let revoked = self.store.revoke_chain(current.chain_id).await?;
            tracing::warn!(
                chain_id = %current.chain_id,
                revoked,
                "refresh token reuse detected; chain revoked"
            );
            return Err(OauthWireError::invalid_grant(
                "refresh token reuse detected; all tokens revoked",
            ));
        }

        // Rotate: invalidate the presented refresh token, issue a new pair
        // in the same chain.
        current.refresh_revoked_at = Some(Utc::now());
        current.access_revoked_at = Some(Utc::now());
        self.store.update_token(&current).await?;

        let grant = self
            .issue_token(&client, current.user_id, &current.scope, current.chain_id)
            .await?;
        Ok(grant)
    }

    async fn issue_token(
        &self,
        client: &OauthClient,
        user_id: UserId,
        scope: &str,
        chain_id: TokenId,
    ) -> OauthResult<TokenGrant> {
        let token = OauthToken {
            token_id: TokenId::now_v7(),
            chain_id,
            access_token: generate_opaque_token(),
            refresh_token: Some(generate_opaque_token()),
            client_id: client.client_id.clone(),
            user_id,
            scope: scope.to_string(),
            issued_at: Utc::now(),
            expires_in: self.access_token_ttl_secs,
            revoked: false,
            access_revoked_at: None,
            refresh_revoked_at: None,
        };
        self.store.put_token(&token).await?;

        Ok(TokenGrant {
            access_token: token.access_token,
            token_type: "Bearer".to_string(),
            expires_in: token.expires_in,
            refresh_token: token.refresh_token,
            scope: token.scope,
        })
    }

    // ========================================================================
    // REVOKE / INTROSPECT
    // ========================================================================

    /// RFC 7009 revocation: finds the token by access or refresh value and
    /// revokes that facet. Unknown tokens succeed silently per the RFC.
    pub async fn revoke(&self, params: RevokeParams, basic_auth: Option<(String, String)>) -> OauthResult<()> {
        let token_params = TokenParams {
            grant_type: String::new(),
            code: None,
            redirect_uri: None,
            client_id: params.client_id.clone(),
            client_secret: params.client_secret.clone(),
            code_verifier: None,
            refresh_token: None,
        };
        let client = self.authenticate_client(&token_params, basic_auth).await?;

        let now = Utc::now();
        if let Some(mut token) = self.store.get_by_access(&params.token).await? {
            if token.client_id == client.client_id {
                token.access_revoked_at = Some(now);
                self.store.update_token(&token).await?;
            }
            return Ok(());
        }
        if let Some(mut token) = self.store.get_by_refresh(&params.token).await? {
            if token.client_id == client.client_id {
                token.refresh_revoked_at = Some(now);
                self.store.update_token(&token).await?;
            }
        }
        Ok(())
    }

    /// Resolve a bearer access token to its owning token row, when valid.
    pub async fn validate_access(&self, access_token: &str) -> MnemaResult<Option<OauthToken>> {
        let Some(token) = self.store.get_by_access(access_token).await? else {
            return Ok(None);
        };
        if token.access_valid_at(Utc::now()) {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }
}
