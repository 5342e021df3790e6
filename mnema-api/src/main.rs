//! Mnema API Server Entry Point
//!
//! Bootstraps configuration, constructs the selected backends, runs
//! migrations, gates startup on backend health, and serves the Axum app
//! with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mnema_api::routes::health::probe_backends;
use mnema_api::{
    create_api_router, ApiConfig, ApiError, ApiKeyStore, ApiResult, AppState, AuthConfig,
    AuthorizationServer, IdpClient, OauthStore, SessionStore,
};
use mnema_core::{BackendKind, CacheKind, Role};
use mnema_engine::{Engine, Reconciler, SecretCipher, ToolSpec, VaultStore};
use mnema_llm::{EmbeddingGateway, GatewayConfig, OllamaEmbeddingProvider, OpenAIEmbeddingProvider};
use mnema_storage::{
    CacheBackend, EmbeddedBackend, EmbeddedVectorIndex, InMemoryCache, MemoryBackend, PgBackend,
    PgConfig, RemoteVectorIndex, VectorIndex,
};

/// Current storage schema version.
const SCHEMA_VERSION: i32 = 1;

#[tokio::main]
async fn main() -> ApiResult<()> {
    mnema_api::telemetry::init_tracing();

    let api_config = ApiConfig::from_env();
    let auth_config = AuthConfig::from_env();
    auth_config.validate_for_production()?;
    let engine_config = ApiConfig::engine_config_from_env();

    // ------------------------------------------------------------------
    // Backend construction, by configuration
    // ------------------------------------------------------------------
    let backend: Arc<dyn MemoryBackend> = match api_config.persistent_backend {
        BackendKind::Embedded => {
            let path = format!("{}/store", api_config.data_dir);
            Arc::new(EmbeddedBackend::new(&path, 1024).map_err(|e| {
                ApiError::internal_error(format!("failed to open embedded store: {}", e))
            })?)
        }
        BackendKind::Networked => {
            let pg_config = PgConfig::from_env().ok_or_else(|| {
                ApiError::invalid_input("PERSISTENT_BACKEND=networked requires DATABASE_URL")
            })?;
            Arc::new(PgBackend::from_config(&pg_config)?)
        }
    };

    let vector: Arc<dyn VectorIndex> = match api_config.vector_backend {
        BackendKind::Embedded => Arc::new(EmbeddedVectorIndex::new()),
        BackendKind::Networked => {
            let url = api_config.vector_url.clone().ok_or_else(|| {
                ApiError::invalid_input("VECTOR_BACKEND=networked requires VECTOR_URL")
            })?;
            Arc::new(RemoteVectorIndex::new(
                url,
                Duration::from_millis(engine_config.vector_deadline_ms),
            )?)
        }
    };

    let cache: Arc<dyn CacheBackend> = match api_config.cache_backend {
        CacheKind::Memory => Arc::new(InMemoryCache::new()),
        CacheKind::Networked => build_networked_cache(&api_config).await?,
    };

    // ------------------------------------------------------------------
    // Migrations, then the health gate
    // ------------------------------------------------------------------
    backend.migrate(SCHEMA_VERSION).await?;

    // ------------------------------------------------------------------
    // Embedding gateway; provider credentials resolve through the vault
    // with an environment fallback
    // ------------------------------------------------------------------
    let cipher = SecretCipher::from_hex(auth_config.vault_key_hex.as_deref());
    let bootstrap_vault = VaultStore::new(backend.clone(), cipher.clone());

    let gateway = build_gateway(&api_config, &bootstrap_vault, cache.clone()).await?;

    // ------------------------------------------------------------------
    // Engine + API-layer stores
    // ------------------------------------------------------------------
    let engine = Engine::new(
        backend.clone(),
        vector.clone(),
        cache.clone(),
        gateway,
        cipher,
        engine_config.clone(),
    );

    let sessions = SessionStore::new(cache.clone(), api_config.session_ttl);
    let api_keys = Arc::new(ApiKeyStore::new(backend.clone(), cache.clone()));
    let oauth = Arc::new(AuthorizationServer::new(
        OauthStore::new(backend.clone()),
        auth_config.access_token_ttl_secs,
    ));
    let idp = auth_config
        .idp
        .clone()
        .map(|config| Arc::new(IdpClient::new(config)));

    register_api_key_tools(&engine, api_keys.clone());

    let state = AppState {
        engine: engine.clone(),
        sessions,
        api_keys,
        oauth,
        idp,
        auth_config: Arc::new(auth_config),
        api_config: Arc::new(api_config.clone()),
        backend,
        vector,
        cache,
        start_time: std::time::Instant::now(),
    };

    // Refuse traffic until every dependency is healthy.
    let report = probe_backends(&state).await;
    if !report.is_ready() {
        for check in &report.checks {
            tracing::error!(component = %check.component, status = ?check.status, "startup health check");
        }
        return Err(ApiError::dependency_unavailable(
            "backends are not healthy; refusing to start",
        ));
    }

    // ------------------------------------------------------------------
    // Background reconciler
    // ------------------------------------------------------------------
    let reconciler = Reconciler::new(
        engine.memories.clone(),
        Duration::from_secs(engine_config.reconcile_interval_secs),
    );
    let reconciler_handle = tokio::spawn(reconciler.run());

    // ------------------------------------------------------------------
    // Serve
    // ------------------------------------------------------------------
    let app = create_api_router(state);
    let addr: SocketAddr = format!("{}:{}", api_config.bind_host, api_config.port)
        .parse()
        .map_err(|e| ApiError::invalid_input(format!("invalid bind address: {}", e)))?;

    tracing::info!(%addr, "starting Mnema API server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::internal_error(format!("server error: {}", e)))?;

    reconciler_handle.abort();
    tracing::info!("shutdown complete");
    Ok(())
}

#[cfg(feature = "redis-cache")]
async fn build_networked_cache(api_config: &ApiConfig) -> ApiResult<Arc<dyn CacheBackend>> {
    let url = api_config
        .redis_url
        .clone()
        .ok_or_else(|| ApiError::invalid_input("CACHE_BACKEND=networked requires REDIS_URL"))?;
    Ok(Arc::new(mnema_storage::RedisCache::connect(&url).await?))
}

#[cfg(not(feature = "redis-cache"))]
async fn build_networked_cache(_api_config: &ApiConfig) -> ApiResult<Arc<dyn CacheBackend>> {
    Err(ApiError::invalid_input(
        "CACHE_BACKEND=networked requires building with the redis-cache feature",
    ))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received; draining in-flight requests");
}

/// Build the embedding gateway for the configured provider, resolving the
/// provider credential through the vault first and the environment second.
async fn build_gateway(
    api_config: &ApiConfig,
    vault: &VaultStore,
    cache: Arc<dyn CacheBackend>,
) -> ApiResult<Arc<EmbeddingGateway>> {
    let provider: Arc<dyn mnema_llm::EmbeddingProvider> =
        match api_config.embedding_provider.as_str() {
            "ollama" => {
                let model = api_config
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| "nomic-embed-text".to_string());
                Arc::new(OllamaEmbeddingProvider::new(
                    api_config.ollama_url.clone(),
                    model,
                    768,
                ))
            }
            "openai" => {
                let api_key = match vault.get_plaintext("openai_api_key").await {
                    Ok(Some(key)) => key,
                    _ => std::env::var("OPENAI_API_KEY").unwrap_or_default(),
                };
                if api_key.is_empty() {
                    tracing::warn!(
                        "no OpenAI credential in vault or OPENAI_API_KEY; embedding calls will fail"
                    );
                }
                match api_config.embedding_model.clone() {
                    Some(model) => Arc::new(OpenAIEmbeddingProvider::new(api_key, model, 1536)),
                    None => Arc::new(OpenAIEmbeddingProvider::with_default_model(api_key)),
                }
            }
            other => {
                return Err(ApiError::invalid_input(format!(
                    "unsupported EMBEDDING_PROVIDER: {}",
                    other
                )))
            }
        };

    Ok(Arc::new(EmbeddingGateway::new(
        provider,
        None,
        cache,
        GatewayConfig::default(),
    )))
}

/// Register the API-key tools on top of the standard table.
fn register_api_key_tools(engine: &Engine, api_keys: Arc<ApiKeyStore>) {
    let spec = ToolSpec {
        name: "api_key_list",
        description: "List the caller's API keys (prefixes only)",
        input_schema: serde_json::json!({"type": "object", "properties": {}}),
        output_schema: serde_json::json!({
            "type": "object",
            "properties": {"api_keys": {"type": "array"}}
        }),
        required_role: Role::ReadOnly,
        remote_capable: true,
        handler: Arc::new(move |principal, _input| {
            let api_keys = api_keys.clone();
            Box::pin(async move {
                let keys = api_keys.list(principal).await?;
                let listed: Vec<serde_json::Value> = keys
                    .into_iter()
                    .map(|k| {
                        serde_json::json!({
                            "api_key_id": k.api_key_id,
                            "name": k.name,
                            "key_prefix": k.key_prefix,
                            "created_at": k.created_at,
                            "revoked_at": k.revoked_at,
                            "expires_at": k.expires_at,
                        })
                    })
                    .collect();
                Ok(serde_json::json!({ "api_keys": listed }))
            })
        }),
    };
    if let Err(e) = engine.tools.register(spec) {
        tracing::error!(error = %e, "failed to register api_key_list tool");
    }
}
