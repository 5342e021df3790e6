//! Authentication Module
//!
//! Credential handling for the API: server-side sessions backed by the
//! cache, hashed API keys, the external-IdP login flow, and the shared
//! secrets/clock configuration they all use.
//!
//! Authentication precedence on requests is session cookie, then bearer
//! OAuth2 access token, then bearer API key (see `middleware::auth`).

pub mod api_keys;
pub mod idp;
pub mod sessions;

pub use api_keys::ApiKeyStore;
pub use idp::{IdpClient, IdpConfig};
pub use sessions::{SessionStore, SESSION_COOKIE};

use crate::error::{ApiError, ApiResult};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

// ============================================================================
// CLOCK ABSTRACTION (FOR DETERMINISTIC TESTS)
// ============================================================================

/// Clock abstraction for token time validation.
///
/// Owning time validation (instead of trusting library defaults) keeps
/// expiry checks deterministic under test and tolerant of clock skew.
pub trait AuthClock: Send + Sync {
    /// Get current time as Unix epoch seconds.
    fn now_epoch_secs(&self) -> i64;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl AuthClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl AuthClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

// ============================================================================
// SIGNING SECRET (TYPE-SAFE)
// ============================================================================

/// Type-safe signing secret that prevents accidental logging.
#[derive(Clone)]
pub struct SigningSecret(SecretString);

impl SigningSecret {
    /// Create a new signing secret with validation.
    pub fn new(secret: String) -> ApiResult<Self> {
        if secret.is_empty() {
            return Err(ApiError::invalid_input("signing secret must not be empty"));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    /// Expose the secret value (only for cryptographic operations).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Get the length of the secret without exposing it.
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    /// Check if the secret is the insecure default.
    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningSecret([REDACTED, {} chars])", self.len())
    }
}

const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Internal signing secret for short-lived artifacts (`JWT_SECRET`).
    pub jwt_secret: SigningSecret,

    /// Vault key hex string (`API_KEY_SECRET`), handed to the engine vault.
    pub vault_key_hex: Option<String>,

    /// External IdP settings (`OAUTH_CLIENT_ID`, `OAUTH_CLIENT_SECRET`,
    /// `OAUTH_REDIRECT_URI`, `OAUTH_ISSUER`).
    pub idp: Option<IdpConfig>,

    /// OAuth2 access token lifetime in seconds (default 3600).
    pub access_token_ttl_secs: i64,

    /// Clock skew tolerance in seconds (default 60).
    pub clock_skew_secs: i64,

    /// Clock for token time validation (injected for testing).
    pub clock: Arc<dyn AuthClock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret)
            .field(
                "vault_key_hex",
                &self.vault_key_hex.as_ref().map(|_| "[REDACTED]"),
            )
            .field("idp", &self.idp)
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("clock_skew_secs", &self.clock_skew_secs)
            .field("clock", &"<AuthClock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: build_secret(INSECURE_DEFAULT_SECRET.to_string()),
            vault_key_hex: None,
            idp: None,
            access_token_ttl_secs: 3600,
            clock_skew_secs: 60,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `JWT_SECRET`: internal signing secret
    /// - `API_KEY_SECRET`: 32-byte (64 hex chars) vault key
    /// - `OAUTH_CLIENT_ID` / `OAUTH_CLIENT_SECRET` / `OAUTH_REDIRECT_URI` /
    ///   `OAUTH_ISSUER`: external IdP
    /// - `MNEMA_ACCESS_TOKEN_TTL_SECS`: OAuth2 access token lifetime
    pub fn from_env() -> Self {
        let jwt_secret = build_secret(
            std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| INSECURE_DEFAULT_SECRET.to_string()),
        );

        Self {
            jwt_secret,
            vault_key_hex: std::env::var("API_KEY_SECRET").ok(),
            idp: IdpConfig::from_env(),
            access_token_ttl_secs: std::env::var("MNEMA_ACCESS_TOKEN_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3600),
            clock_skew_secs: 60,
            clock: Arc::new(SystemClock),
        }
    }

    /// Validate the configuration for production use.
    ///
    /// Insecure defaults abort startup in production and log a warning in
    /// development.
    pub fn validate_for_production(&self) -> ApiResult<()> {
        let environment = std::env::var("MNEMA_ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();
        let is_production = environment == "production" || environment == "prod";

        if self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(
                    "Cannot start in production with the default JWT_SECRET; set a secure value",
                ));
            }
            tracing::warn!(
                "using the insecure default JWT secret; set JWT_SECRET before deploying"
            );
        }

        if self.jwt_secret.len() < 32 && !self.jwt_secret.is_insecure_default() {
            if is_production {
                return Err(ApiError::invalid_input(format!(
                    "JWT_SECRET is too short for production use ({} chars, minimum 32)",
                    self.jwt_secret.len()
                )));
            }
            tracing::warn!(
                chars = self.jwt_secret.len(),
                "JWT secret is short; use at least 32 characters in production"
            );
        }

        Ok(())
    }
}

fn build_secret(secret: String) -> SigningSecret {
    let normalized = if secret.trim().is_empty() {
        INSECURE_DEFAULT_SECRET.to_string()
    } else {
        secret
    };
    match SigningSecret::new(normalized) {
        Ok(secret) => secret,
        Err(_) => SigningSecret(SecretString::new(INSECURE_DEFAULT_SECRET.to_string().into())),
    }
}

// ============================================================================
// OPAQUE TOKEN GENERATION
// ============================================================================

/// Generate a high-entropy opaque token: 32 random bytes, URL-safe base64.
pub fn generate_opaque_token() -> String {
    use base64::Engine as _;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_tokens_are_unique_and_urlsafe() {
        let a = generate_opaque_token();
        let b = generate_opaque_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_signing_secret_redacts_debug() {
        let secret = SigningSecret::new("super-secret-value".to_string()).expect("valid");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(SigningSecret::new(String::new()).is_err());
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock(1704067200);
        assert_eq!(clock.now_epoch_secs(), 1704067200);
    }
}
