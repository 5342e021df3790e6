//! API Configuration Module
//!
//! Configuration is loaded from environment variables with development
//! defaults, at exactly one construction site in `main`. Recognized
//! variables are documented on each accessor.

use std::time::Duration;

use mnema_core::{BackendKind, CacheKind, EngineConfig};

/// API configuration: bind address, CORS, sessions, and backend selection.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Bind / CORS
    // ========================================================================
    /// Bind host (`MNEMA_BIND`, default 0.0.0.0).
    pub bind_host: String,

    /// Bind port (`PORT`, default 3000).
    pub port: u16,

    /// Allowed CORS origins (`ALLOWED_ORIGINS`, comma-separated).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    // ========================================================================
    // Sessions
    // ========================================================================
    /// Session TTL (`MNEMA_SESSION_TTL_SECS`, default 24h).
    pub session_ttl: Duration,

    /// Cookie `Secure` attribute; disable only for local development
    /// (`MNEMA_INSECURE_COOKIES=true`).
    pub secure_cookies: bool,

    // ========================================================================
    // Backend selection
    // ========================================================================
    /// `PERSISTENT_BACKEND` ∈ {embedded, networked}.
    pub persistent_backend: BackendKind,

    /// `VECTOR_BACKEND` ∈ {embedded, networked}.
    pub vector_backend: BackendKind,

    /// `CACHE_BACKEND` ∈ {memory, networked}.
    pub cache_backend: CacheKind,

    /// Data directory for embedded backends (`MNEMA_DATA_DIR`).
    pub data_dir: String,

    /// Networked vector endpoint (`VECTOR_URL`).
    pub vector_url: Option<String>,

    /// Networked cache endpoint (`REDIS_URL`).
    pub redis_url: Option<String>,

    // ========================================================================
    // Embedding provider
    // ========================================================================
    /// `EMBEDDING_PROVIDER` ∈ {openai, ollama} (default openai).
    pub embedding_provider: String,

    /// `EMBEDDING_MODEL` (provider-specific default when unset).
    pub embedding_model: Option<String>,

    /// Ollama endpoint (`OLLAMA_URL`, default http://localhost:11434).
    pub ollama_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: Vec::new(),
            session_ttl: Duration::from_secs(24 * 3600),
            secure_cookies: true,
            persistent_backend: BackendKind::Embedded,
            vector_backend: BackendKind::Embedded,
            cache_backend: CacheKind::Memory,
            data_dir: "./mnema-data".to_string(),
            vector_url: None,
            redis_url: None,
            embedding_provider: "openai".to_string(),
            embedding_model: None,
            ollama_url: "http://localhost:11434".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            bind_host: std::env::var("MNEMA_BIND").unwrap_or(defaults.bind_host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins,
            session_ttl: Duration::from_secs(
                std::env::var("MNEMA_SESSION_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(24 * 3600),
            ),
            secure_cookies: std::env::var("MNEMA_INSECURE_COOKIES")
                .map(|s| s.to_lowercase() != "true")
                .unwrap_or(true),
            persistent_backend: std::env::var("PERSISTENT_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.persistent_backend),
            vector_backend: std::env::var("VECTOR_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.vector_backend),
            cache_backend: std::env::var("CACHE_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_backend),
            data_dir: std::env::var("MNEMA_DATA_DIR").unwrap_or(defaults.data_dir),
            vector_url: std::env::var("VECTOR_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
            embedding_provider: std::env::var("EMBEDDING_PROVIDER")
                .unwrap_or(defaults.embedding_provider),
            embedding_model: std::env::var("EMBEDDING_MODEL").ok(),
            ollama_url: std::env::var("OLLAMA_URL").unwrap_or(defaults.ollama_url),
        }
    }

    /// Engine tunables from environment, layered over the defaults.
    pub fn engine_config_from_env() -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(fusion) = std::env::var("MNEMA_FUSION_CONSTANT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.fusion_constant = fusion;
        }
        if let Some(horizon) = std::env::var("MNEMA_GC_HORIZON_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.gc_horizon_secs = horizon;
        }
        config
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            // Dev mode: allow all
            return true;
        }
        self.cors_origins.iter().any(|allowed| allowed == origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.persistent_backend, BackendKind::Embedded);
        assert_eq!(config.cache_backend, CacheKind::Memory);
        assert!(config.secure_cookies);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_origin_allowed_dev_mode() {
        let config = ApiConfig::default();
        assert!(config.is_origin_allowed("https://anything.example"));
    }

    #[test]
    fn test_origin_allowed_production() {
        let mut config = ApiConfig::default();
        config.cors_origins = vec!["https://app.mnema.dev".to_string()];
        assert!(config.is_origin_allowed("https://app.mnema.dev"));
        assert!(!config.is_origin_allowed("https://evil.example"));
    }
}
