//! Shared application state for Axum routers.

use std::sync::Arc;

use mnema_engine::Engine;
use mnema_storage::{CacheBackend, MemoryBackend, VectorIndex};

use crate::auth::{ApiKeyStore, AuthConfig, IdpClient, SessionStore};
use crate::config::ApiConfig;
use crate::oauth::AuthorizationServer;

/// Application-wide state shared across all routes.
///
/// Constructed once at startup; everything inside is cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub sessions: SessionStore,
    pub api_keys: Arc<ApiKeyStore>,
    pub oauth: Arc<AuthorizationServer>,
    pub idp: Option<Arc<IdpClient>>,
    pub auth_config: Arc<AuthConfig>,
    pub api_config: Arc<ApiConfig>,

    // Raw backend handles for health probes.
    pub backend: Arc<dyn MemoryBackend>,
    pub vector: Arc<dyn VectorIndex>,
    pub cache: Arc<dyn CacheBackend>,

    pub start_time: std::time::Instant,
}
