//! End-to-end engine tests over the fully embedded stack.

use std::sync::Arc;
use std::time::Duration;

use mnema_core::{
    EngineConfig, EntityIdType, MemoryScope, MnemaError, Principal, Role, SearchMode,
    SourceOrigin,
};
use mnema_engine::{
    Engine, GraphQuery, ListFilter, PutRequest, Reconciler, SearchFilter, SearchQuery,
    SecretCipher, UpdatePatch,
};
use mnema_engine::users::NewUserProfile;
use mnema_storage::{CacheBackend, MemoryBackend, VectorIndex};
use mnema_test_utils::TestStack;

fn test_vault_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        *b = i as u8;
    }
    key
}

fn engine_over(stack: &TestStack, config: EngineConfig) -> Engine {
    Engine::new(
        stack.backend.clone() as Arc<dyn MemoryBackend>,
        stack.vector.clone() as Arc<dyn VectorIndex>,
        stack.cache.clone() as Arc<dyn CacheBackend>,
        stack.gateway.clone(),
        SecretCipher::new(Some(&test_vault_key())),
        config,
    )
}

async fn provision(engine: &Engine, subject: &str) -> Principal {
    let (user, _) = engine
        .users
        .provision(NewUserProfile {
            external_subject: subject.to_string(),
            email: format!("{}@example.com", subject),
            display_name: None,
            avatar_url: None,
        })
        .await
        .expect("provision user");
    Principal::new(user.user_id, user.role)
}

fn put(key: &str, value: &str, tags: &[&str], importance: f64) -> PutRequest {
    PutRequest {
        key: key.to_string(),
        value: value.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        importance,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_memory_round_trip_counts_access() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    let outcome = engine
        .memories
        .put(principal, put("pref_lang", "Python", &[], 0.5))
        .await
        .expect("put");
    assert!(outcome.created);
    assert!(!outcome.needs_reindex);
    assert_eq!(outcome.record.access_count, 0);

    let fetched = engine
        .memories
        .get(principal, "default", "pref_lang", None)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(fetched.value, "Python");
    assert_eq!(fetched.access_count, 1);
    assert!(fetched.updated_at >= fetched.created_at);

    let again = engine
        .memories
        .get(principal, "default", "pref_lang", None)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(again.access_count, 2);
}

#[tokio::test]
async fn test_put_overwrite_and_delete_idempotence() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    engine
        .memories
        .put(principal, put("k", "v1", &[], 0.5))
        .await
        .expect("put");
    let second = engine
        .memories
        .put(principal, put("k", "v2", &[], 0.5))
        .await
        .expect("overwrite");
    assert!(!second.created);
    assert_eq!(second.record.value, "v2");

    assert!(engine
        .memories
        .delete(principal, "default", "k", None)
        .await
        .expect("delete"));
    // Idempotent second delete.
    assert!(!engine
        .memories
        .delete(principal, "default", "k", None)
        .await
        .expect("delete again"));
    assert!(engine
        .memories
        .get(principal, "default", "k", None)
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn test_importance_clamped_and_tags_normalized() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    let outcome = engine
        .memories
        .put(
            principal,
            put("k", "v", &["  Rust ", "RUST", "backend"], 7.5),
        )
        .await
        .expect("put");
    assert_eq!(outcome.record.importance, 1.0);
    assert_eq!(outcome.record.tags, vec!["rust", "backend"]);
}

#[tokio::test]
async fn test_unknown_owner_rejected() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());

    let ghost = Principal::new(mnema_core::UserId::new_v4(), Role::User);
    let err = engine
        .memories
        .put(ghost, put("k", "v", &[], 0.5))
        .await
        .expect_err("unknown owner must be rejected");
    assert!(matches!(err, MnemaError::Access(_)));
}

#[tokio::test]
async fn test_hybrid_search_deterministic_order() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    // Fixture of memories with known token overlap against the query.
    let fixtures = [
        ("m_fastapi", "FastAPI backend development patterns", 0.9),
        ("m_django", "Django backend development notes", 0.8),
        ("m_postgres", "Postgres tuning for backend development", 0.7),
        ("m_gardening", "Gardening schedule for spring", 0.9),
        ("m_frontend", "Frontend styling conventions", 0.6),
    ];
    for (key, value, importance) in fixtures {
        engine
            .memories
            .put(principal, put(key, value, &["notes"], importance))
            .await
            .expect("put fixture");
    }

    let query = SearchQuery {
        query_text: Some("backend development".to_string()),
        k: 3,
        mode: SearchMode::Hybrid,
        ..Default::default()
    };

    let first = engine
        .search
        .search(principal, query.clone())
        .await
        .expect("search");
    assert_eq!(first.len(), 3);
    let keys: Vec<&str> = first.iter().map(|r| r.record.key.as_str()).collect();
    assert_eq!(keys, vec!["m_fastapi", "m_django", "m_postgres"]);
    for result in &first {
        assert!(result.origins.contains(&SourceOrigin::Lexical));
    }

    // Determinism: identical call, identical order and scores.
    let second = engine
        .search
        .search(principal, query)
        .await
        .expect("search again");
    let second_keys: Vec<&str> = second.iter().map(|r| r.record.key.as_str()).collect();
    assert_eq!(keys, second_keys);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.score, b.score);
    }
}

#[tokio::test]
async fn test_search_does_not_bias_access_counts() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    engine
        .memories
        .put(principal, put("k", "backend development", &[], 0.5))
        .await
        .expect("put");

    let results = engine
        .search
        .search(
            principal,
            SearchQuery {
                query_text: Some("backend".to_string()),
                k: 5,
                ..Default::default()
            },
        )
        .await
        .expect("search");
    assert_eq!(results[0].record.access_count, 0);

    // mark_accessed opts in to the bookkeeping.
    let marked = engine
        .search
        .search(
            principal,
            SearchQuery {
                query_text: Some("backend".to_string()),
                k: 5,
                mark_accessed: true,
                ..Default::default()
            },
        )
        .await
        .expect("search");
    assert_eq!(marked[0].record.access_count, 1);
}

#[tokio::test]
async fn test_cross_user_isolation() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let admin = provision(&engine, "admin").await;
    assert_eq!(admin.role, Role::Admin);
    let alice = provision(&engine, "alice").await;
    let bob = provision(&engine, "bob").await;

    engine
        .memories
        .put(alice, put("secret", "42", &[], 0.5))
        .await
        .expect("put");

    // Bob sees nothing.
    let results = engine
        .search
        .search(
            bob,
            SearchQuery {
                query_text: Some("42".to_string()),
                k: 10,
                ..Default::default()
            },
        )
        .await
        .expect("search");
    assert!(results.is_empty());

    // Bob cannot name Alice as target.
    let err = engine
        .search
        .search(
            bob,
            SearchQuery {
                query_text: Some("42".to_string()),
                k: 10,
                target_user: Some(alice.user_id),
                ..Default::default()
            },
        )
        .await
        .expect_err("cross-user denied");
    assert!(matches!(err, MnemaError::Access(_)));

    // Admin with explicit target sees it.
    let results = engine
        .search
        .search(
            admin,
            SearchQuery {
                query_text: Some("42".to_string()),
                k: 10,
                target_user: Some(alice.user_id),
                ..Default::default()
            },
        )
        .await
        .expect("admin search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.key, "secret");
}

#[tokio::test]
async fn test_k_zero_returns_empty() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    engine
        .memories
        .put(principal, put("k", "backend", &[], 0.5))
        .await
        .expect("put");

    let results = engine
        .search
        .search(
            principal,
            SearchQuery {
                query_text: Some("backend".to_string()),
                k: 0,
                ..Default::default()
            },
        )
        .await
        .expect("search");
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_empty_query_orders_by_importance_then_recency() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    engine
        .memories
        .put(principal, put("low", "a", &[], 0.2))
        .await
        .expect("put");
    engine
        .memories
        .put(principal, put("high", "b", &[], 0.9))
        .await
        .expect("put");
    engine
        .memories
        .put(principal, put("mid", "c", &[], 0.5))
        .await
        .expect("put");

    let results = engine
        .search
        .search(
            principal,
            SearchQuery {
                query_text: None,
                k: 10,
                mode: SearchMode::Hybrid,
                ..Default::default()
            },
        )
        .await
        .expect("search");
    let keys: Vec<&str> = results.iter().map(|r| r.record.key.as_str()).collect();
    assert_eq!(keys, vec!["high", "mid", "low"]);
}

#[tokio::test]
async fn test_partial_write_flagged_and_reconciled() {
    let stack = TestStack::with_vector_failures(0, false);
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    // Arm a single vector failure, then write.
    stack.vector.fail_next(1);
    let outcome = engine
        .memories
        .put(principal, put("flaky", "backend reliability notes", &[], 0.5))
        .await
        .expect("put succeeds despite vector failure");
    assert!(outcome.needs_reindex);
    assert!(outcome.record.needs_reindex);

    // The row is durable and readable...
    assert!(engine
        .memories
        .get(principal, "default", "flaky", None)
        .await
        .expect("get")
        .is_some());

    // ...but vector-mode search cannot find it yet.
    let results = engine
        .search
        .search(
            principal,
            SearchQuery {
                query_text: Some("reliability".to_string()),
                k: 10,
                mode: SearchMode::Vector,
                ..Default::default()
            },
        )
        .await
        .expect("search");
    assert!(results.is_empty());

    // The reconciler repairs it.
    let reconciler = Reconciler::new(engine.memories.clone(), Duration::from_secs(3600));
    let repaired = reconciler.sweep_once().await.expect("sweep");
    assert_eq!(repaired, 1);

    let results = engine
        .search
        .search(
            principal,
            SearchQuery {
                query_text: Some("reliability".to_string()),
                k: 10,
                mode: SearchMode::Vector,
                ..Default::default()
            },
        )
        .await
        .expect("search after reconcile");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].record.key, "flaky");
    assert!(!results[0].record.needs_reindex);

    // Sweep with nothing left to do is a no-op.
    assert_eq!(reconciler.sweep_once().await.expect("sweep"), 0);
}

#[tokio::test]
async fn test_gc_only_touches_idle_working_memories() {
    let stack = TestStack::new();
    let mut config = EngineConfig::default();
    config.gc_horizon_secs = 0;
    let engine = engine_over(&stack, config);
    let admin = provision(&engine, "admin").await;

    engine
        .memories
        .put(
            admin,
            PutRequest {
                key: "scratch".to_string(),
                value: "temp".to_string(),
                scope: MemoryScope::Working,
                ..Default::default()
            },
        )
        .await
        .expect("put working");
    engine
        .memories
        .put(admin, put("keep", "forever", &[], 0.5))
        .await
        .expect("put persistent");

    tokio::time::sleep(Duration::from_millis(10)).await;

    let outcome = engine.memories.gc(admin, None).await.expect("gc");
    assert_eq!(outcome.deleted, 1);

    // gc twice deletes the same set as once.
    let again = engine.memories.gc(admin, None).await.expect("gc again");
    assert_eq!(again.deleted, 0);

    assert!(engine
        .memories
        .get(admin, "default", "keep", None)
        .await
        .expect("get")
        .is_some());
    assert!(engine
        .memories
        .get(admin, "default", "scratch", None)
        .await
        .expect("get")
        .is_none());

    // Non-admins cannot trigger gc.
    let alice = provision(&engine, "alice").await;
    assert!(engine.memories.gc(alice, None).await.is_err());
}

#[tokio::test]
async fn test_update_patch_and_reembed() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    engine
        .memories
        .put(principal, put("pref", "loves python", &[], 0.5))
        .await
        .expect("put");

    let outcome = engine
        .memories
        .update(
            principal,
            "default",
            "pref",
            UpdatePatch {
                value: Some("loves rust".to_string()),
                importance: Some(0.9),
                ..Default::default()
            },
            None,
        )
        .await
        .expect("update");
    assert_eq!(outcome.record.value, "loves rust");
    assert_eq!(outcome.record.importance, 0.9);

    // The new value is findable by vector search, the old one is not.
    let results = engine
        .search
        .search(
            principal,
            SearchQuery {
                query_text: Some("rust".to_string()),
                k: 5,
                mode: SearchMode::Vector,
                ..Default::default()
            },
        )
        .await
        .expect("search");
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_list_filters_by_scope_and_tags() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    engine
        .memories
        .put(principal, put("a", "v", &["rust"], 0.5))
        .await
        .expect("put");
    engine
        .memories
        .put(
            principal,
            PutRequest {
                key: "b".to_string(),
                value: "v".to_string(),
                scope: MemoryScope::Working,
                tags: vec!["python".to_string()],
                ..Default::default()
            },
        )
        .await
        .expect("put");

    let rust_only = engine
        .memories
        .list(
            principal,
            ListFilter {
                tags: vec!["rust".to_string()],
                ..Default::default()
            },
        )
        .await
        .expect("list");
    assert_eq!(rust_only.len(), 1);
    assert_eq!(rust_only[0].key, "a");

    let working_only = engine
        .memories
        .list(
            principal,
            ListFilter {
                scope: Some(MemoryScope::Working),
                ..Default::default()
            },
        )
        .await
        .expect("list");
    assert_eq!(working_only.len(), 1);
    assert_eq!(working_only[0].key, "b");
}

#[tokio::test]
async fn test_stats_aggregation() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    engine
        .memories
        .put(principal, put("a", "hello", &["rust", "notes"], 1.0))
        .await
        .expect("put");
    engine
        .memories
        .put(
            principal,
            PutRequest {
                key: "b".to_string(),
                value: "world".to_string(),
                scope: MemoryScope::Working,
                tags: vec!["notes".to_string()],
                importance: 0.0,
                ..Default::default()
            },
        )
        .await
        .expect("put");

    let stats = engine.memories.stats(principal, None).await.expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.persistent, 1);
    assert_eq!(stats.working, 1);
    assert_eq!(stats.total_value_bytes, 10);
    assert!((stats.average_importance - 0.5).abs() < f64::EPSILON);
    assert_eq!(stats.distinct_agents, 1);
    assert_eq!(stats.tag_histogram.get("notes"), Some(&2));
    assert_eq!(stats.tag_histogram.get("rust"), Some(&1));
}

#[tokio::test]
async fn test_graph_lifecycle_and_traversal() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    let service = engine
        .graph
        .add_node(principal, None, "service", None, None, None)
        .await
        .expect("node");
    let db = engine
        .graph
        .add_node(principal, None, "database", None, None, None)
        .await
        .expect("node");
    let cache_node = engine
        .graph
        .add_node(principal, None, "cache", None, None, None)
        .await
        .expect("node");

    engine
        .graph
        .add_edge(
            principal,
            service.node_id,
            db.node_id,
            "depends_on",
            Some(2.0),
            None,
            None,
            None,
            None,
        )
        .await
        .expect("edge");
    engine
        .graph
        .add_edge(
            principal,
            db.node_id,
            cache_node.node_id,
            "depends_on",
            Some(3.0),
            None,
            None,
            None,
            None,
        )
        .await
        .expect("edge");

    // Depth is clamped at the configured maximum, not rejected.
    let paths = engine
        .graph
        .query(
            principal,
            GraphQuery {
                start_ids: vec![service.node_id],
                relation_types: vec![],
                max_depth: 99,
                direction: mnema_core::TraversalDirection::Outbound,
                at: None,
                target_user: None,
            },
        )
        .await
        .expect("traverse");
    assert_eq!(paths.len(), 2);
    let deepest = paths
        .iter()
        .max_by_key(|p| p.depth)
        .expect("at least one path");
    assert_eq!(deepest.depth, 2);
    assert!((deepest.total_weight - 5.0).abs() < f64::EPSILON);

    // Other users cannot see or traverse this graph.
    let bob = provision(&engine, "bob").await;
    let paths = engine
        .graph
        .query(
            bob,
            GraphQuery {
                start_ids: vec![service.node_id],
                relation_types: vec![],
                max_depth: 3,
                direction: mnema_core::TraversalDirection::Outbound,
                at: None,
                target_user: None,
            },
        )
        .await
        .expect("traverse");
    assert!(paths.is_empty());

    // Removing the middle node removes its incident edges.
    assert!(engine
        .graph
        .remove_node(principal, db.node_id, None)
        .await
        .expect("remove"));
    let neighbors = engine
        .graph
        .neighbors(
            principal,
            service.node_id,
            &[],
            mnema_core::TraversalDirection::Both,
            None,
        )
        .await
        .expect("neighbors");
    assert!(neighbors.is_empty());
}

#[tokio::test]
async fn test_memory_delete_clears_graph_reference() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    let outcome = engine
        .memories
        .put(principal, put("fact", "the sky is blue", &[], 0.5))
        .await
        .expect("put");
    let node = engine
        .graph
        .add_node(
            principal,
            None,
            "fact",
            None,
            Some(outcome.record.memory_id),
            None,
        )
        .await
        .expect("node");

    engine
        .memories
        .delete(principal, "default", "fact", None)
        .await
        .expect("delete");

    // The node survives with its memory reference cleared.
    let fetched = engine
        .graph
        .get_node(principal, node.node_id, None)
        .await
        .expect("get node")
        .expect("node survives");
    assert!(fetched.memory_ref.is_none());
}

#[tokio::test]
async fn test_tool_dispatch_end_to_end() {
    let stack = TestStack::new();
    let engine = engine_over(&stack, EngineConfig::default());
    let principal = provision(&engine, "alice").await;

    let put_out = engine
        .tools
        .dispatch(
            principal,
            "memory_put",
            serde_json::json!({"key": "pref_lang", "value": "Rust"}),
            true,
        )
        .await
        .expect("dispatch put");
    assert_eq!(put_out["created"], serde_json::json!(true));

    let get_out = engine
        .tools
        .dispatch(
            principal,
            "memory_get",
            serde_json::json!({"key": "pref_lang"}),
            true,
        )
        .await
        .expect("dispatch get");
    assert_eq!(get_out["memory"]["value"], serde_json::json!("Rust"));

    let listing = engine
        .tools
        .dispatch(principal, "list_tools", serde_json::json!({}), true)
        .await
        .expect("list tools");
    let names: Vec<String> = listing["tools"]
        .as_array()
        .expect("array")
        .iter()
        .map(|t| t["name"].as_str().expect("name").to_string())
        .collect();
    assert!(names.contains(&"memory_search".to_string()));
    assert!(names.contains(&"graph_query".to_string()));
}
