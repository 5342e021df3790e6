//! Mnema Engine - Memory, Retrieval, Graph, and Tooling
//!
//! The server-side substance of the platform: principal-scoped memory CRUD
//! with per-key write serialization, the hybrid retrieval pipeline, the
//! per-owner knowledge graph, the audit log, the encrypted secret vault,
//! and the tool registry that exposes all of it to remote callers.
//!
//! Everything here is dependency-injected: one `Engine` is constructed at
//! startup from the chosen backends and carried with each request.

pub mod audit;
mod codec;
pub mod graph;
pub mod locks;
pub mod memory;
pub mod reconcile;
pub mod search;
pub mod tools;
pub mod users;
pub mod vault;

pub use audit::{AuditLog, RequestContext};
pub use graph::{GraphPath, GraphQuery, GraphStore, NeighborEntry};
pub use locks::KeyLockMap;
pub use memory::{GcOutcome, ListFilter, MemoryStore, PutOutcome, PutRequest, UpdatePatch};
pub use reconcile::Reconciler;
pub use search::{SearchEngine, SearchFilter, SearchQuery, SearchResult, SearchResultPreview};
pub use tools::{ToolDescriptor, ToolError, ToolRegistry, ToolSpec};
pub use users::{NewUserProfile, UserStore};
pub use vault::{SecretCipher, VaultStore};

use std::sync::Arc;

use mnema_core::EngineConfig;
use mnema_llm::EmbeddingGateway;
use mnema_storage::{CacheBackend, MemoryBackend, VectorIndex};

/// Everything the engine needs, wired once at startup.
#[derive(Clone)]
pub struct Engine {
    pub users: Arc<UserStore>,
    pub memories: Arc<MemoryStore>,
    pub search: Arc<SearchEngine>,
    pub graph: Arc<GraphStore>,
    pub audit: Arc<AuditLog>,
    pub vault: Arc<VaultStore>,
    pub tools: Arc<ToolRegistry>,
    pub config: EngineConfig,
}

impl Engine {
    /// Wire the engine from its backends. The tool registry is populated
    /// with the standard tool table.
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        vector: Arc<dyn VectorIndex>,
        cache: Arc<dyn CacheBackend>,
        gateway: Arc<EmbeddingGateway>,
        cipher: SecretCipher,
        config: EngineConfig,
    ) -> Self {
        let users = Arc::new(UserStore::new(backend.clone()));
        let memories = Arc::new(MemoryStore::new(
            backend.clone(),
            vector.clone(),
            cache.clone(),
            gateway.clone(),
            users.clone(),
            config.clone(),
        ));
        let search = Arc::new(SearchEngine::new(
            backend.clone(),
            vector.clone(),
            gateway,
            memories.clone(),
            config.clone(),
        ));
        let graph = Arc::new(GraphStore::new(backend.clone(), config.clone()));
        let audit = Arc::new(AuditLog::new(backend.clone()));
        let vault = Arc::new(VaultStore::new(backend, cipher));
        let tools = Arc::new(tools::standard_registry(
            memories.clone(),
            search.clone(),
            graph.clone(),
        ));

        Self {
            users,
            memories,
            search,
            graph,
            audit,
            vault,
            tools,
            config,
        }
    }
}
