use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use quizgate_core::cache::MemoryAnswerCache;
use quizgate_core::config::Config;
use quizgate_core::health::HealthTracker;
use quizgate_core::rate_limit::RateLimiter;
use quizgate_core::registry::{FileProxySource, ProxyRegistry};
use quizgate_core::store::MemoryQuestionStore;
use quizgate_provider::{Dispatcher, OpenAICompatExecutor, ProbeBoard};
use quizgate_server::answer::AnswerService;
use quizgate_server::reload::Reloader;
use quizgate_server::{AppState, build_router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helper: build an AppState over a temp config file listing mock upstreams
// ---------------------------------------------------------------------------

struct TestHarness {
    state: AppState,
    config_path: std::path::PathBuf,
    _temp_dir: tempfile::TempDir,
}

fn config_yaml(access_token: Option<&str>, upstreams: &[(&str, &str, i32)]) -> String {
    config_yaml_with(access_token, upstreams, "")
}

/// `extra` is appended as top-level YAML sections.
fn config_yaml_with(
    access_token: Option<&str>,
    upstreams: &[(&str, &str, i32)],
    extra: &str,
) -> String {
    let mut yaml = String::from("dispatch:\n  retry-backoff-ms: 1\n  timeout-secs: 5\nprobe:\n  enabled: false\n");
    yaml.push_str(extra);
    if let Some(token) = access_token {
        yaml.push_str(&format!("access-token: \"{token}\"\n"));
    }
    yaml.push_str("third-party-apis:\n");
    for (name, base, priority) in upstreams {
        yaml.push_str(&format!(
            "  - name: \"{name}\"\n    api_base: \"{base}\"\n    api_keys: [\"sk-{name}\"]\n    models: [\"test-model\"]\n    priority: {priority}\n"
        ));
    }
    yaml
}

fn create_test_harness(access_token: Option<&str>, upstreams: &[(&str, &str, i32)]) -> TestHarness {
    create_harness_from_yaml(&config_yaml(access_token, upstreams))
}

fn create_harness_from_yaml(yaml: &str) -> TestHarness {
    let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
    let config_path = temp_dir.path().join("config.yaml");
    std::fs::write(&config_path, yaml).expect("failed to write config");
    let path_str = config_path.to_str().unwrap().to_string();

    let config = Config::load(&path_str).expect("config should load");
    let registry = Arc::new(
        ProxyRegistry::from_source(FileProxySource::new(path_str.clone()))
            .expect("pool should load"),
    );
    let health = Arc::new(HealthTracker::new(config.health.clone()));
    let executor = Arc::new(
        OpenAICompatExecutor::from_config(None, &config.dispatch).expect("http client"),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        health.clone(),
        executor,
        config.dispatch.clone(),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let config = Arc::new(ArcSwap::from_pointee(config));
    let answers = Arc::new(AnswerService::new(
        config.clone(),
        dispatcher.clone(),
        Arc::new(MemoryAnswerCache::new()),
        Arc::new(MemoryQuestionStore::new()),
    ));
    let reloader = Arc::new(Reloader::new(
        path_str,
        config.clone(),
        registry.clone(),
        health.clone(),
        dispatcher.clone(),
        rate_limiter.clone(),
    ));

    TestHarness {
        state: AppState {
            config,
            registry,
            health,
            dispatcher,
            answers,
            probes: Arc::new(ProbeBoard::new()),
            rate_limiter,
            reloader,
            start_time: Instant::now(),
        },
        config_path,
        _temp_dir: temp_dir,
    }
}

/// Helper: send a request to the router and return (status, body as Value).
async fn send_request(harness: &TestHarness, request: Request<Body>) -> (StatusCode, Value) {
    let router = build_router(harness.state.clone());
    let response = router.oneshot(request).await.expect("request failed");
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let value: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
    }))
}

async fn mount_answer(server: &MockServer, content: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion(content))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_status(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

const MULTIPLE_QUERY: &str = "/api/search?title=planets&type=multiple&options=A.earth%0AB.moon%0AC.mars";

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_search_normalizes_and_caches() {
    let upstream = MockServer::start().await;
    mount_answer(&upstream, "A, C", 1).await;
    let harness = create_test_harness(None, &[("primary", &upstream.uri(), 1)]);

    let (status, body) = send_request(&harness, get(MULTIPLE_QUERY)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 1);
    assert_eq!(body["question"], "planets");
    assert_eq!(body["answer"], "A#C");

    // Served from cache; the mock's expect(1) verifies on drop.
    let (_, body) = send_request(&harness, get(MULTIPLE_QUERY)).await;
    assert_eq!(body["answer"], "A#C");
}

#[tokio::test]
async fn test_search_post_json_and_form() {
    let upstream = MockServer::start().await;
    mount_answer(&upstream, "对", 2).await;
    let harness = create_test_harness(None, &[("primary", &upstream.uri(), 1)]);

    let request = Request::builder()
        .method("POST")
        .uri("/api/search")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "title": "the earth is round", "type": "judgement" }).to_string(),
        ))
        .unwrap();
    let (status, body) = send_request(&harness, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 1);
    assert_eq!(body["answer"], "正确");

    let request = Request::builder()
        .method("POST")
        .uri("/api/search")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("title=water+is+wet&type=judgement"))
        .unwrap();
    let (_, body) = send_request(&harness, request).await;
    assert_eq!(body["code"], 1);
    assert_eq!(body["question"], "water is wet");
    assert_eq!(body["answer"], "正确");
}

#[tokio::test]
async fn test_search_without_title() {
    let upstream = MockServer::start().await;
    mount_answer(&upstream, "unused", 0).await;
    let harness = create_test_harness(None, &[("primary", &upstream.uri(), 1)]);

    let (status, body) = send_request(&harness, get("/api/search?type=single")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["msg"], "未提供问题内容");
}

#[tokio::test]
async fn test_search_fails_over_by_priority() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;
    mount_status(&primary, 401).await;
    mount_answer(&backup, "Beijing", 1).await;
    let harness = create_test_harness(
        None,
        &[("backup", &backup.uri(), 2), ("primary", &primary.uri(), 1)],
    );

    let (_, body) =
        send_request(&harness, get("/api/search?title=capital&type=completion")).await;
    assert_eq!(body["code"], 1);
    assert_eq!(body["answer"], "Beijing");

    // 401 is not retried on the same proxy.
    assert_eq!(primary.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_search_exhaustion_is_generic() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    mount_status(&a, 500).await;
    mount_status(&b, 503).await;
    let harness = create_test_harness(None, &[("a", &a.uri(), 1), ("b", &b.uri(), 2)]);

    let (status, body) =
        send_request(&harness, get("/api/search?title=capital&type=completion")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(
        body["msg"],
        "could not obtain an answer after trying available providers"
    );
    assert_eq!(a.received_requests().await.unwrap().len(), 3);
    assert_eq!(b.received_requests().await.unwrap().len(), 3);

    let (status, body) = send_request(&harness, get("/api/admin/health/a")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["consecutive_failures"], 3);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["last_error"], "serverError");
}

// ---------------------------------------------------------------------------
// Access token
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_access_token_required_when_configured() {
    let upstream = MockServer::start().await;
    mount_answer(&upstream, "Beijing", 1).await;
    let harness = create_test_harness(Some("s3cret"), &[("primary", &upstream.uri(), 1)]);
    let uri = "/api/search?title=capital&type=completion";

    let (status, body) = send_request(&harness, get(uri)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 0);
    assert_eq!(body["msg"], "无效的访问令牌");

    let request = Request::builder()
        .uri(uri)
        .header("x-access-token", "s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_request(&harness, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "Beijing");

    // Query token works too; the answer now comes from cache.
    let (status, body) = send_request(&harness, get(&format!("{uri}&token=s3cret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "Beijing");

    let (status, body) = send_request(&harness, post("/api/cache/clear")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, body) = send_request(&harness, get("/api/admin/health")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "unauthorized");

    // Liveness stays public.
    let (status, _) = send_request(&harness, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Cache, health and admin surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cache_clear_forces_new_upstream_call() {
    let upstream = MockServer::start().await;
    mount_answer(&upstream, "Beijing", 2).await;
    let harness = create_test_harness(None, &[("primary", &upstream.uri(), 1)]);
    let uri = "/api/search?title=capital&type=completion";

    send_request(&harness, get(uri)).await;
    let (_, body) = send_request(&harness, get("/api/health")).await;
    assert_eq!(body["cache_entries"], 1);

    let (status, body) = send_request(&harness, post("/api/cache/clear")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["cleared"], 1);

    send_request(&harness, get(uri)).await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let upstream = MockServer::start().await;
    let harness = create_test_harness(None, &[("primary", &upstream.uri(), 1)]);

    let (status, body) = send_request(&harness, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cache_enabled"], true);
    assert_eq!(body["proxies"], 1);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_admin_failover_controls() {
    let upstream = MockServer::start().await;
    let harness = create_test_harness(None, &[("primary", &upstream.uri(), 1)]);

    let (_, body) = send_request(&harness, post("/api/admin/failover/toggle")).await;
    assert_eq!(body["enabled"], false);
    assert!(!harness.state.health.is_enabled());

    let (_, body) = send_request(&harness, post("/api/admin/failover/enable")).await;
    assert_eq!(body["enabled"], true);

    let (_, body) = send_request(&harness, post("/api/admin/failover/disable")).await;
    assert_eq!(body["enabled"], false);

    let (_, body) = send_request(&harness, get("/api/admin/health")).await;
    assert_eq!(body["enabled"], false);
    assert_eq!(body["proxies"]["primary"]["status"], "unknown");
    assert_eq!(body["proxies"]["primary"]["success_rate"], 100.0);
}

#[tokio::test]
async fn test_admin_health_reset() {
    let upstream = MockServer::start().await;
    let harness = create_test_harness(None, &[("primary", &upstream.uri(), 1)]);
    for _ in 0..3 {
        harness
            .state
            .health
            .record_failure("primary", quizgate_core::error::ErrorClass::Timeout);
    }

    let (_, body) = send_request(&harness, get("/api/admin/health/primary")).await;
    assert_eq!(body["status"], "unhealthy");

    let (_, body) = send_request(&harness, post("/api/admin/health/reset?name=primary")).await;
    assert_eq!(body["reset"], true);

    let (_, body) = send_request(&harness, get("/api/admin/health/primary")).await;
    assert_eq!(body["consecutive_failures"], 0);
    assert_eq!(body["status"], "unknown");

    let (status, body) = send_request(&harness, get("/api/admin/health/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_admin_proxies_reload() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    let harness = create_test_harness(None, &[("a", &a.uri(), 1)]);

    let (_, body) = send_request(&harness, get("/api/admin/proxies")).await;
    assert_eq!(body["stats"]["total_proxies"], 1);
    assert_eq!(body["models"], json!(["test-model"]));
    assert!(!body.to_string().contains("sk-a"));

    std::fs::write(
        &harness.config_path,
        config_yaml(None, &[("a", &a.uri(), 1), ("b", &b.uri(), 2)]),
    )
    .unwrap();
    let (status, body) = send_request(&harness, post("/api/admin/proxies/reload")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["proxies"], 2);

    // A broken file keeps the current pool.
    std::fs::write(&harness.config_path, "third-party-apis:\n  - name: \"x\"\n").unwrap();
    let (status, _) = send_request(&harness, post("/api/admin/proxies/reload")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(harness.state.registry.active_proxies().len(), 2);
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let upstream = MockServer::start().await;
    let harness = create_test_harness(None, &[("primary", &upstream.uri(), 1)]);
    let response = build_router(harness.state.clone())
        .oneshot(get("/api/health"))
        .await
        .unwrap();
    let id = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(id.len(), 36);
}

#[tokio::test]
async fn test_admin_reload_applies_whole_config() {
    let a = MockServer::start().await;
    let harness = create_test_harness(None, &[("a", &a.uri(), 1)]);

    let (_, body) = send_request(&harness, get("/api/admin/config")).await;
    assert_eq!(body["health"]["max-failures"], 3);
    assert_eq!(body["dispatch"]["retry-backoff-ms"], 1);
    assert_eq!(body["rate_limit"]["requests"], 60);
    assert_eq!(body["access_token_set"], false);

    std::fs::write(
        &harness.config_path,
        config_yaml_with(
            None,
            &[("a", &a.uri(), 1)],
            "health:\n  max-failures: 5\nrate-limit:\n  requests: 10\ncache:\n  ttl-secs: 120\n",
        ),
    )
    .unwrap();
    let (status, _) = send_request(&harness, post("/api/admin/proxies/reload")).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send_request(&harness, get("/api/admin/config")).await;
    assert_eq!(body["health"]["max-failures"], 5);
    assert_eq!(body["rate_limit"]["requests"], 10);
    assert_eq!(body["cache"]["ttl-secs"], 120);
    assert_eq!(harness.state.config.load().cache.ttl_secs, 120);
}

#[tokio::test]
async fn test_reload_with_misspelled_pool_keeps_proxies() {
    let a = MockServer::start().await;
    mount_answer(&a, "Beijing", 1).await;
    let harness = create_test_harness(None, &[("a", &a.uri(), 1)]);

    std::fs::write(
        &harness.config_path,
        format!(
            "third-party-api:\n  - name: a\n    api_base: \"{}\"\n    api_keys: [k]\n    models: [m]\nhealth:\n  max-failures: 9\n",
            a.uri()
        ),
    )
    .unwrap();
    let (status, body) = send_request(&harness, post("/api/admin/proxies/reload")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "config_error");

    assert_eq!(harness.state.registry.active_proxies().len(), 1);
    assert_eq!(harness.state.health.config().max_failures, 3);

    let (_, body) =
        send_request(&harness, get("/api/search?title=capital&type=completion")).await;
    assert_eq!(body["code"], 1);
    assert_eq!(body["answer"], "Beijing");
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

fn search_from(client: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/search?title=capital&type=completion")
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_search_rate_limit_per_client() {
    let upstream = MockServer::start().await;
    mount_answer(&upstream, "Beijing", 1).await;
    let harness = create_harness_from_yaml(&config_yaml_with(
        None,
        &[("primary", &upstream.uri(), 1)],
        "rate-limit:\n  requests: 2\n  period-secs: 60\n",
    ));

    for _ in 0..2 {
        let (status, body) = send_request(&harness, search_from("203.0.113.7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 1);
    }

    let response = build_router(harness.state.clone())
        .oneshot(search_from("203.0.113.7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert!(response.headers().contains_key("retry-after"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["code"], 0);
    assert_eq!(body["msg"], "请求过于频繁，请稍后再试");

    // Another client is unaffected; other routes are not limited.
    let (status, _) = send_request(&harness, search_from("198.51.100.1")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_request(&harness, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_counts_rejected_tokens() {
    let upstream = MockServer::start().await;
    mount_answer(&upstream, "unused", 0).await;
    let harness = create_harness_from_yaml(&config_yaml_with(
        Some("s3cret"),
        &[("primary", &upstream.uri(), 1)],
        "rate-limit:\n  requests: 1\n",
    ));

    let (status, _) = send_request(&harness, search_from("203.0.113.9")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send_request(&harness, search_from("203.0.113.9")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], 0);
}
