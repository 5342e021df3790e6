//! HTTP-level tests over the full embedded stack.
//!
//! These drive the real router with tower's `oneshot` — middleware, CSRF,
//! role checks, and the OAuth2 wire format included. The IdP login flow is
//! bypassed by provisioning users directly and minting sessions through the
//! session store, which is exactly what the callback handler does after
//! code exchange.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use mnema_api::auth::SESSION_COOKIE;
use mnema_api::{
    create_api_router, ApiConfig, ApiKeyStore, AppState, AuthConfig, AuthorizationServer,
    OauthStore, SessionStore,
};
use mnema_core::{EngineConfig, Principal, Role, User};
use mnema_engine::users::NewUserProfile;
use mnema_engine::{Engine, SecretCipher};
use mnema_storage::{CacheBackend, MemoryBackend, VectorIndex};
use mnema_test_utils::TestStack;
use serde_json::{json, Value as JsonValue};
use tower::util::ServiceExt;

// ============================================================================
// TEST HARNESS
// ============================================================================

struct TestApp {
    router: Router,
    state: AppState,
    _stack: TestStack,
}

struct TestSession {
    cookie: String,
    csrf: String,
    user: User,
}

fn vault_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        *b = (i as u8).wrapping_mul(3).wrapping_add(7);
    }
    key
}

impl TestApp {
    fn new() -> Self {
        let stack = TestStack::new();
        let backend: Arc<dyn MemoryBackend> = stack.backend.clone();
        let vector: Arc<dyn VectorIndex> = stack.vector.clone();
        let cache: Arc<dyn CacheBackend> = stack.cache.clone();

        let engine = Engine::new(
            backend.clone(),
            vector.clone(),
            cache.clone(),
            stack.gateway.clone(),
            SecretCipher::new(Some(&vault_key())),
            EngineConfig::default(),
        );

        let sessions = SessionStore::new(cache.clone(), Duration::from_secs(3600));
        let api_keys = Arc::new(ApiKeyStore::new(backend.clone(), cache.clone()));
        let oauth = Arc::new(AuthorizationServer::new(OauthStore::new(backend.clone()), 3600));

        let mut api_config = ApiConfig::default();
        api_config.secure_cookies = false;

        let state = AppState {
            engine,
            sessions,
            api_keys,
            oauth,
            idp: None,
            auth_config: Arc::new(AuthConfig::default()),
            api_config: Arc::new(api_config),
            backend,
            vector,
            cache,
            start_time: std::time::Instant::now(),
        };

        Self {
            router: create_api_router(state.clone()),
            state,
            _stack: stack,
        }
    }

    /// Provision a user and mint a session, as the SSO callback would.
    async fn login(&self, subject: &str) -> TestSession {
        let (user, _) = self
            .state
            .engine
            .users
            .provision(NewUserProfile {
                external_subject: subject.to_string(),
                email: format!("{}@example.com", subject),
                display_name: None,
                avatar_url: None,
            })
            .await
            .expect("provision");
        let (token, record) = self
            .state
            .sessions
            .create(user.user_id)
            .await
            .expect("session");
        TestSession {
            cookie: format!("{}={}", SESSION_COOKIE, token),
            csrf: record.csrf_token,
            user,
        }
    }

    async fn request(
        &self,
        method: Method,
        uri: &str,
        session: Option<&TestSession>,
        bearer: Option<&str>,
        body: Option<JsonValue>,
    ) -> (StatusCode, JsonValue) {
        let mut builder = Request::builder().method(method.clone()).uri(uri);
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, &session.cookie);
            if matches!(method, Method::POST | Method::PUT | Method::DELETE) {
                builder = builder.header("x-csrf-token", &session.csrf);
            }
        }
        if let Some(bearer) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", bearer));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
        };
        (status, json)
    }

    /// Form-encoded POST (OAuth endpoints).
    async fn post_form(&self, uri: &str, form: &[(&str, &str)]) -> (StatusCode, JsonValue) {
        let body: String = form
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
        (status, json)
    }
}

// ============================================================================
// AUTH SURFACE
// ============================================================================

#[tokio::test]
async fn test_unauthenticated_requests_rejected() {
    let app = TestApp::new();

    let (status, body) = app
        .request(Method::GET, "/auth/me", None, None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], json!("UNAUTHORIZED"));

    let (status, _) = app
        .request(Method::GET, "/memory", None, None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_is_public() {
    let app = TestApp::new();
    let (status, body) = app.request(Method::GET, "/health", None, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["checks"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn test_session_flow_and_first_user_admin() {
    let app = TestApp::new();
    let first = app.login("first").await;
    let second = app.login("second").await;

    assert_eq!(first.user.role, Role::Admin);
    assert_eq!(second.user.role, Role::User);

    let (status, body) = app
        .request(Method::GET, "/auth/me", Some(&first), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auth_method"], json!("session"));
    assert_eq!(body["user"]["role"], json!("admin"));
}

#[tokio::test]
async fn test_cookie_mutations_require_csrf() {
    let app = TestApp::new();
    let session = app.login("alice").await;

    // Missing CSRF header.
    let request = Request::builder()
        .method(Method::POST)
        .uri("/memory")
        .header(header::COOKIE, &session.cookie)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"key": "k", "value": "v"}).to_string(),
        ))
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // With the synchronizer token it goes through.
    let (status, _) = app
        .request(
            Method::POST,
            "/memory",
            Some(&session),
            None,
            Some(json!({"key": "k", "value": "v"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// MEMORY SURFACE
// ============================================================================

#[tokio::test]
async fn test_memory_round_trip_over_http() {
    let app = TestApp::new();
    let session = app.login("alice").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/memory",
            Some(&session),
            None,
            Some(json!({"key": "pref_lang", "value": "Python", "scope": "persistent"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], json!(true));
    assert_eq!(body["needs_reindex"], json!(false));

    let (status, body) = app
        .request(Method::GET, "/memory/pref_lang", Some(&session), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], json!("Python"));
    assert_eq!(body["access_count"], json!(1));

    let (status, _) = app
        .request(Method::DELETE, "/memory/pref_lang", Some(&session), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(Method::GET, "/memory/pref_lang", Some(&session), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_hybrid_search_over_http() {
    let app = TestApp::new();
    let session = app.login("alice").await;

    for (key, value) in [
        ("m_fastapi", "FastAPI backend development patterns"),
        ("m_django", "Django backend development notes"),
        ("m_postgres", "Postgres tuning for backend development"),
        ("m_gardening", "Gardening schedule for spring"),
    ] {
        let (status, _) = app
            .request(
                Method::POST,
                "/memory",
                Some(&session),
                None,
                Some(json!({"key": key, "value": value})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app
        .request(
            Method::POST,
            "/memory/search",
            Some(&session),
            None,
            Some(json!({"query": "backend development", "k": 3, "mode": "hybrid"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().expect("results");
    assert_eq!(results.len(), 3);
    let keys: Vec<&str> = results
        .iter()
        .map(|r| r["memory"]["key"].as_str().expect("key"))
        .collect();
    assert_eq!(keys, vec!["m_fastapi", "m_django", "m_postgres"]);
}

#[tokio::test]
async fn test_cross_user_isolation_over_http() {
    let app = TestApp::new();
    let admin = app.login("admin").await;
    let alice = app.login("alice").await;
    let bob = app.login("bob").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/memory",
            Some(&alice),
            None,
            Some(json!({"key": "secret", "value": "42"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Bob's search finds nothing.
    let (_, body) = app
        .request(
            Method::POST,
            "/memory/search",
            Some(&bob),
            None,
            Some(json!({"query": "42", "k": 10})),
        )
        .await;
    assert_eq!(body["results"].as_array().map(Vec::len), Some(0));

    // Bob cannot target Alice.
    let (status, _) = app
        .request(
            Method::POST,
            "/memory/search",
            Some(&bob),
            None,
            Some(json!({
                "query": "42",
                "k": 10,
                "target_user": alice.user.user_id.to_string(),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The admin, with an explicit target, can.
    let (status, body) = app
        .request(
            Method::POST,
            "/memory/search",
            Some(&admin),
            None,
            Some(json!({
                "query": "42",
                "k": 10,
                "target_user": alice.user.user_id.to_string(),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().map(Vec::len), Some(1));
}

// ============================================================================
// API KEYS
// ============================================================================

#[tokio::test]
async fn test_api_key_lifecycle_over_http() {
    let app = TestApp::new();
    let session = app.login("alice").await;

    let (status, body) = app
        .request(
            Method::POST,
            "/api-keys",
            Some(&session),
            None,
            Some(json!({"name": "ci"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let plaintext = body["key"].as_str().expect("plaintext").to_string();
    assert!(plaintext.starts_with("kg_"));
    let key_id = body["api_key"]["api_key_id"].as_str().expect("id").to_string();
    // The response never carries the stored hash.
    assert!(body["api_key"]["key_hash"].is_null());

    // The plaintext authenticates as a bearer.
    let (status, body) = app
        .request(Method::GET, "/auth/me", None, Some(&plaintext), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auth_method"], json!("api_key"));

    // Revoke, then the same bearer fails.
    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api-keys/{}", key_id),
            Some(&session),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(Method::GET, "/auth/me", None, Some(&plaintext), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// OAUTH2 AUTHORIZATION SERVER
// ============================================================================

async fn register_public_client(app: &TestApp, admin: &TestSession) -> String {
    let (status, body) = app
        .request(
            Method::POST,
            "/oauth/clients",
            Some(admin),
            None,
            Some(json!({
                "name": "cli",
                "redirect_uris": ["http://localhost:9000/cb"],
                "token_endpoint_auth_method": "none",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["client_secret"].is_null());
    body["client_id"].as_str().expect("client_id").to_string()
}

async fn fetch_code(app: &TestApp, session: &TestSession, client_id: &str, challenge: &str) -> String {
    let uri = format!(
        "/oauth/authorize?response_type=code&client_id={}&redirect_uri={}&code_challenge={}&code_challenge_method=S256&state=xyz",
        urlencoding::encode(client_id),
        urlencoding::encode("http://localhost:9000/cb"),
        urlencoding::encode(challenge),
    );
    let request = Request::builder()
        .method(Method::GET)
        .uri(&uri)
        .header(header::COOKIE, &session.cookie)
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .and_then(|h| h.to_str().ok())
        .expect("location")
        .to_string();
    assert!(location.contains("state=xyz"));
    location
        .split("code=")
        .nth(1)
        .expect("code param")
        .split('&')
        .next()
        .expect("code value")
        .to_string()
}

#[tokio::test]
async fn test_oauth_pkce_happy_path_and_code_single_use() {
    let app = TestApp::new();
    let admin = app.login("admin").await;
    let client_id = register_public_client(&app, &admin).await;

    // S256 challenge from the RFC test vector.
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    let code = fetch_code(&app, &admin, &client_id, challenge).await;

    // Exchange with the correct verifier.
    let (status, body) = app
        .post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "http://localhost:9000/cb"),
                ("client_id", &client_id),
                ("code_verifier", verifier),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let access_token = body["access_token"].as_str().expect("access").to_string();
    let refresh_token = body["refresh_token"].as_str().expect("refresh").to_string();
    assert_eq!(body["token_type"], json!("Bearer"));
    assert_eq!(body["expires_in"], json!(3600));

    // The access token authenticates API calls.
    let (status, body) = app
        .request(Method::GET, "/auth/me", None, Some(&access_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auth_method"], json!("oauth_token"));

    // Reusing the code fails with invalid_grant.
    let (status, body) = app
        .post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "http://localhost:9000/cb"),
                ("client_id", &client_id),
                ("code_verifier", verifier),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid_grant"));

    // Refresh rotates.
    let (status, body) = app
        .post_form(
            "/oauth/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &client_id),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_access = body["access_token"].as_str().expect("access").to_string();
    assert_ne!(new_access, access_token);

    // Replaying the old refresh revokes the whole chain.
    let (status, body) = app
        .post_form(
            "/oauth/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &client_id),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid_grant"));

    // The rotated access token died with the chain.
    let (status, _) = app
        .request(Method::GET, "/auth/me", None, Some(&new_access), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_oauth_wrong_verifier_rejected() {
    let app = TestApp::new();
    let admin = app.login("admin").await;
    let client_id = register_public_client(&app, &admin).await;

    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
    let code = fetch_code(&app, &admin, &client_id, challenge).await;

    let (status, body) = app
        .post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", "http://localhost:9000/cb"),
                ("client_id", &client_id),
                ("code_verifier", "wrong-verifier-wrong-verifier-wrong-verifier"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid_grant"));
}

#[tokio::test]
async fn test_oauth_public_client_requires_pkce() {
    let app = TestApp::new();
    let admin = app.login("admin").await;
    let client_id = register_public_client(&app, &admin).await;

    let uri = format!(
        "/oauth/authorize?response_type=code&client_id={}&redirect_uri={}",
        urlencoding::encode(&client_id),
        urlencoding::encode("http://localhost:9000/cb"),
    );
    let request = Request::builder()
        .method(Method::GET)
        .uri(&uri)
        .header(header::COOKIE, &admin.cookie)
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// VAULT + RBAC + AUDIT
// ============================================================================

#[tokio::test]
async fn test_vault_is_admin_only_and_audited() {
    let app = TestApp::new();
    let admin = app.login("admin").await;
    let user = app.login("user").await;

    // Non-admin denied.
    let (status, _) = app
        .request(
            Method::POST,
            "/external-api-keys",
            Some(&user),
            None,
            Some(json!({"key_name": "openai_api_key", "provider_tag": "openai", "value": "sk-1"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin writes; the response exposes metadata only.
    let (status, body) = app
        .request(
            Method::POST,
            "/external-api-keys",
            Some(&admin),
            None,
            Some(json!({"key_name": "openai_api_key", "provider_tag": "openai", "value": "sk-1"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key_name"], json!("openai_api_key"));
    assert!(body.get("value").is_none());
    assert!(body.get("ciphertext").is_none());
    let secret_id = body["secret_id"].as_str().expect("secret_id").to_string();

    // PUT rotates the value in place under the path-keyed name.
    let (status, body) = app
        .request(
            Method::PUT,
            "/external-api-keys/openai_api_key",
            Some(&admin),
            None,
            Some(json!({"provider_tag": "openai", "value": "sk-2"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["secret_id"], json!(secret_id));

    // The mutation left an audit row with hashed values only.
    let (status, body) = app
        .request(Method::GET, "/audit", Some(&admin), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let events = body.as_array().expect("events");
    assert!(!events.is_empty());
    let event = &events[0];
    assert_eq!(event["action"], json!("external_secret.upsert"));
    let hash = event["new_value_hash"].as_str().expect("hash");
    assert_eq!(hash.len(), 64);
    assert!(!hash.contains("sk-1"));

    // Audit listing itself is admin-only.
    let (status, _) = app
        .request(Method::GET, "/audit", Some(&user), None, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_change_is_audited_and_enforced() {
    let app = TestApp::new();
    let admin = app.login("admin").await;
    let user = app.login("user").await;

    // Non-admin cannot change roles.
    let (status, _) = app
        .request(
            Method::PUT,
            &format!("/users/{}/role", admin.user.user_id),
            Some(&user),
            None,
            Some(json!({"role": "read_only"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin demotes the user to read-only.
    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/users/{}/role", user.user.user_id),
            Some(&admin),
            None,
            Some(json!({"role": "read_only"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], json!("read_only"));

    // Read-only principals cannot write memories.
    let (status, _) = app
        .request(
            Method::POST,
            "/memory",
            Some(&user),
            None,
            Some(json!({"key": "k", "value": "v"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// ============================================================================
// MCP SURFACE
// ============================================================================

#[tokio::test]
async fn test_mcp_list_and_call() {
    let app = TestApp::new();
    let session = app.login("alice").await;

    let (status, body) = app
        .request(Method::GET, "/mcp/tools", Some(&session), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let tools = body["tools"].as_array().expect("tools");
    let names: Vec<&str> = tools
        .iter()
        .map(|t| t["name"].as_str().expect("name"))
        .collect();
    assert!(names.contains(&"memory_put"));
    assert!(names.contains(&"memory_search"));
    assert!(names.contains(&"graph_query"));
    // Every visible tool is remote-capable with a schema.
    for tool in tools {
        assert_eq!(tool["remote_capable"], json!(true));
        assert!(tool["input_schema"].is_object());
    }

    // Call a tool through the protocol surface.
    let (status, body) = app
        .request(
            Method::POST,
            "/mcp/call",
            Some(&session),
            None,
            Some(json!({
                "tool_name": "memory_put",
                "input": {"key": "pref", "value": "Rust"},
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_error"], json!(false));
    assert_eq!(body["output"]["created"], json!(true));

    // Schema violations surface as tool errors, not transport errors.
    let (status, body) = app
        .request(
            Method::POST,
            "/mcp/call",
            Some(&session),
            None,
            Some(json!({"tool_name": "memory_put", "input": {"key": "missing-value"}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_error"], json!(true));
}

// ============================================================================
// PARTIAL WRITES
// ============================================================================

#[tokio::test]
async fn test_partial_write_surfaces_needs_reindex() {
    let app = TestApp::new();
    let session = app.login("alice").await;

    app._stack.vector.fail_next(1);
    let (status, body) = app
        .request(
            Method::POST,
            "/memory",
            Some(&session),
            None,
            Some(json!({"key": "flaky", "value": "will reindex later"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["needs_reindex"], json!(true));

    // Durable read works immediately.
    let (status, body) = app
        .request(Method::GET, "/memory/flaky", Some(&session), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["needs_reindex"], json!(true));

    // Reconcile synchronously, then the flag clears.
    let reconciler = mnema_engine::Reconciler::new(
        app.state.engine.memories.clone(),
        Duration::from_secs(3600),
    );
    assert_eq!(reconciler.sweep_once().await.expect("sweep"), 1);

    let (_, body) = app
        .request(Method::GET, "/memory/flaky", Some(&session), None, None)
        .await;
    assert_eq!(body["needs_reindex"], json!(false));
}

// Ensure the harness types stay in sync with the library surface.
#[tokio::test]
async fn test_me_reports_principal_fields() {
    let app = TestApp::new();
    let session = app.login("carol").await;
    let principal = Principal::new(session.user.user_id, session.user.role);
    assert_eq!(principal.user_id, session.user.user_id);

    let (status, body) = app
        .request(Method::GET, "/auth/me", Some(&session), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["user"]["user_id"],
        json!(session.user.user_id.to_string())
    );
}
