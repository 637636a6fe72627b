//! End-to-end tests driving the full axum stack
//!
//! Each test builds a [`Pipeline`], attaches it to a small router and sends
//! requests through `tower::ServiceExt::oneshot`. No network is involved.

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::Path,
    http::{header, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{self, post},
    Extension, Json, Router,
};
use security_pipeline::{
    api::audit_routes,
    audit::{
        AuditAnnotation, AuditEvent, AuditEventType, AuditQueryFilters, AuditStore,
        InMemoryAuditStore, REDACTION_MARKER,
    },
    error::AuditError,
    middleware::{MockClock, Principal, Rejection, SanitizedInput},
    Pipeline, SecurityConfig,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Store that only counts writes
#[derive(Default)]
struct CountingStore {
    saves: AtomicUsize,
}

#[async_trait]
impl AuditStore for CountingStore {
    async fn save(&self, _event: AuditEvent) -> Result<(), AuditError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, _filters: &AuditQueryFilters) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(Vec::new())
    }
}

/// Store that rejects every write
struct BrokenStore;

#[async_trait]
impl AuditStore for BrokenStore {
    async fn save(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::StoreUnavailable("connection refused".to_string()))
    }

    async fn query(&self, _filters: &AuditQueryFilters) -> Result<Vec<AuditEvent>, AuditError> {
        Err(AuditError::QueryFailed("connection refused".to_string()))
    }
}

async fn echo(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn raw_query(uri: Uri) -> String {
    uri.query().unwrap_or_default().to_string()
}

async fn item(Extension(input): Extension<SanitizedInput>) -> Json<Value> {
    Json(input.path_params)
}

async fn raw_item(Path(id): Path<String>) -> String {
    id
}

async fn login(Json(body): Json<Value>) -> StatusCode {
    if body["password"] == "correct horse" {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

async fn annotated() -> Response {
    let mut response = StatusCode::OK.into_response();
    response
        .extensions_mut()
        .insert(AuditAnnotation::event_type(AuditEventType::SecurityViolation).with_action("honeypot.hit"));
    response
}

fn app(pipeline: &Pipeline) -> Router {
    let routes = Router::new()
        .route("/echo", post(echo))
        .route("/search", routing::get(raw_query))
        .route("/items/:id", routing::get(item))
        .route("/raw-items/:id", routing::get(raw_item))
        .route("/api/auth/login", post(login))
        .route("/trap", routing::get(annotated))
        .route("/health", routing::get(|| async { "ok" }))
        .route("/internal/fail", routing::get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    pipeline.attach(routes)
}

fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.10")
}

fn json_request(uri: &str, body: Value) -> Request<Body> {
    request(Method::POST, uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(request(Method::GET, uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Audit writes are spawned; poll until `count` events are visible
async fn wait_for_events(store: &Arc<dyn AuditStore>, count: usize) -> Vec<AuditEvent> {
    for _ in 0..100 {
        let events = store.query(&AuditQueryFilters::default()).await.unwrap();
        if events.len() >= count {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} audit events", count);
}

#[tokio::test]
async fn test_rate_limit_scenario() {
    let clock = MockClock::default();
    let mut config = SecurityConfig::production();
    config.rate_limit.max_requests = 5;
    config.rate_limit.window_seconds = 5;
    let pipeline = Pipeline::builder(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    let app = app(&pipeline);

    for remaining in (0..5).rev() {
        let response = get(&app, "/search").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["ratelimit-limit"], "5");
        assert_eq!(response.headers()["ratelimit-remaining"], remaining.to_string().as_str());
    }

    let limited = get(&app, "/search").await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.headers()[header::RETRY_AFTER], "1");
    let body = body_json(limited).await;
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");

    clock.advance(Duration::from_secs(2));
    assert_eq!(get(&app, "/search").await.status(), StatusCode::OK);
    assert_eq!(get(&app, "/search").await.status(), StatusCode::OK);
    assert_eq!(get(&app, "/search").await.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rate_limit_is_per_key() {
    let mut config = SecurityConfig::production();
    config.rate_limit.max_requests = 1;
    let pipeline = Pipeline::builder(config)
        .clock(Arc::new(MockClock::default()))
        .build()
        .unwrap();
    let app = app(&pipeline);

    for ip in ["203.0.113.1", "203.0.113.2"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/search")
                    .header("x-forwarded-for", ip)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_custom_rate_limit_handler_and_key() {
    let mut config = SecurityConfig::production();
    config.rate_limit.max_requests = 1;
    let pipeline = Pipeline::builder(config)
        .clock(Arc::new(MockClock::default()))
        .rate_limit_key(|req| {
            security_pipeline::middleware::RateLimitKey::new(
                req.headers
                    .get("x-tenant")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("none"),
            )
        })
        .on_rate_limited(|_, _| Rejection::custom(StatusCode::SERVICE_UNAVAILABLE, "SLOW_DOWN", "Tenant over quota"))
        .build()
        .unwrap();
    let app = app(&pipeline);

    let send = |tenant: &'static str| {
        app.clone().oneshot(
            Request::builder()
                .uri("/search")
                .header("x-tenant", tenant)
                .body(Body::empty())
                .unwrap(),
        )
    };

    assert_eq!(send("acme").await.unwrap().status(), StatusCode::OK);
    let limited = send("acme").await.unwrap();
    assert_eq!(limited.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(limited).await["error"]["code"], "SLOW_DOWN");
    assert_eq!(send("globex").await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_credentials_reflect_origin() {
    let mut config = SecurityConfig::production();
    config.cors_origins = vec!["https://app.example.com".to_string()];
    config.cors_credentials = true;
    let pipeline = Pipeline::new(config).unwrap();
    let app = app(&pipeline);

    let response = app
        .clone()
        .oneshot(
            request(Method::GET, "/search")
                .header(header::ORIGIN, "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.com"
    );
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert!(response
        .headers()
        .get_all(header::VARY)
        .iter()
        .any(|v| v.to_str().unwrap().contains("Origin")));

    let denied = app
        .oneshot(
            request(Method::GET, "/search")
                .header(header::ORIGIN, "https://evil.example.net")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    let body = body_json(denied).await;
    assert_eq!(body["error"]["code"], "CORS_ORIGIN_DENIED");
}

#[tokio::test]
async fn test_preflight_short_circuits() {
    let mut config = SecurityConfig::production();
    config.cors_origins = vec!["https://app.example.com".to_string()];
    let pipeline = Pipeline::new(config).unwrap();

    let response = app(&pipeline)
        .oneshot(
            request(Method::OPTIONS, "/echo")
                .header(header::ORIGIN, "https://app.example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS].to_str().unwrap();
    assert!(methods.contains("POST"));
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], "content-type");
    assert_eq!(response.headers()[header::ACCESS_CONTROL_MAX_AGE], "600");
}

#[tokio::test]
async fn test_async_origin_predicate() {
    let pipeline = Pipeline::builder(SecurityConfig::development())
        .origin_policy(security_pipeline::middleware::OriginPolicy::async_predicate(
            |origin: String| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(origin.ends_with(".trusted.test"))
            },
        ))
        .build()
        .unwrap();
    let app = app(&pipeline);

    let send = |origin: &'static str| {
        app.clone().oneshot(
            request(Method::GET, "/search")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap(),
        )
    };

    assert_eq!(send("https://a.trusted.test").await.unwrap().status(), StatusCode::OK);
    assert_eq!(send("https://a.untrusted.test").await.unwrap().status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_injection_and_xss_are_neutralized() {
    let pipeline = Pipeline::new(SecurityConfig::production()).unwrap();

    let response = app(&pipeline)
        .oneshot(json_request("/echo", json!({"$gt": "", "name": "<script>x</script>"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");

    let body = body_json(response).await;
    assert_eq!(body, json!({"_$gt": "", "name": "&lt;script&gt;x&lt;/script&gt;"}));
}

#[tokio::test]
async fn test_nested_operators_are_neutralized() {
    let pipeline = Pipeline::new(SecurityConfig::production()).unwrap();

    let response = app(&pipeline)
        .oneshot(json_request(
            "/echo",
            json!({"filter": {"age": {"$where": "1"}}, "list": [{"$ne": null}]}),
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["filter"]["age"], json!({"_$where": "1"}));
    assert_eq!(body["list"][0], json!({"_$ne": null}));
    assert!(!pipeline.metrics().export_prometheus().is_empty());
    assert_eq!(pipeline.metrics().get_metrics().injection_neutralizations, 2);
}

#[tokio::test]
async fn test_parameter_pollution_keeps_last_value() {
    let mut config = SecurityConfig::production();
    config.hpp_whitelist = vec!["tag".to_string()];
    let pipeline = Pipeline::new(config).unwrap();

    let response = app(&pipeline)
        .oneshot(
            request(Method::GET, "/search?tag=a&tag=b&sort=asc&sort=desc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    // Parameters are re-encoded in key order
    assert_eq!(body_text(response).await, "sort=desc&tag=a&tag=b");
}

#[tokio::test]
async fn test_query_and_path_params_are_sanitized() {
    let pipeline = Pipeline::new(SecurityConfig::production()).unwrap();
    let app = app(&pipeline);

    let response = app
        .clone()
        .oneshot(
            request(Method::GET, "/search?q=%3Cb%3E%20hi%20")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_text(response).await, "q=%26lt%3Bb%26gt%3B+hi");

    let response = app
        .oneshot(
            request(Method::GET, "/items/%3Cimg%3E")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({"id": "&lt;img&gt;"}));
}

#[tokio::test]
async fn test_path_extractor_sees_raw_segments() {
    let pipeline = Pipeline::new(SecurityConfig::production()).unwrap();

    let response = app(&pipeline)
        .oneshot(
            request(Method::GET, "/raw-items/%3Cimg%3E")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "<img>");
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let mut config = SecurityConfig::production();
    config.cors_origins = vec!["https://app.example.com".to_string()];
    config.max_body_bytes = 16;
    let pipeline = Pipeline::new(config).unwrap();

    let response = app(&pipeline)
        .oneshot(
            request(Method::POST, "/echo")
                .header(header::ORIGIN, "https://app.example.com")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"padding": "x".repeat(64)}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    // Rejections raised before the chain still carry CORS and hardening headers
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.com"
    );
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
    assert_eq!(body["error"]["details"]["limitBytes"], 16);
}

#[tokio::test]
async fn test_unsupported_media_type_is_rejected() {
    let pipeline = Pipeline::new(SecurityConfig::production()).unwrap();

    let response = app(&pipeline)
        .oneshot(
            request(Method::POST, "/echo")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNSUPPORTED_MEDIA_TYPE");
    assert_eq!(body["error"]["details"]["contentType"], "text/plain");
}

#[tokio::test]
async fn test_malformed_bodies_spend_tokens() {
    let mut config = SecurityConfig::production();
    config.rate_limit.max_requests = 2;
    let pipeline = Pipeline::builder(config)
        .clock(Arc::new(MockClock::default()))
        .build()
        .unwrap();
    let app = app(&pipeline);

    let malformed = || {
        request(Method::POST, "/echo")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap()
    };

    let mut statuses = Vec::new();
    for _ in 0..4 {
        statuses.push(app.clone().oneshot(malformed()).await.unwrap().status());
    }
    assert_eq!(
        statuses,
        vec![
            StatusCode::BAD_REQUEST,
            StatusCode::BAD_REQUEST,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );

    let valid = app.oneshot(json_request("/echo", json!({"ok": true}))).await.unwrap();
    assert_eq!(valid.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_denied_origin_wins_over_body_checks() {
    let mut config = SecurityConfig::production();
    config.cors_origins = vec!["https://good.com".to_string()];
    config.max_body_bytes = 8;
    let pipeline = Pipeline::new(config).unwrap();
    let app = app(&pipeline);

    for (content_type, body) in [("text/plain", "hello"), ("application/json", "{\"padding\": \"xxxxxxxx\"}")] {
        let response = app
            .clone()
            .oneshot(
                request(Method::POST, "/echo")
                    .header(header::ORIGIN, "https://evil.com")
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"]["code"], "CORS_ORIGIN_DENIED");
    }
}

#[tokio::test]
async fn test_missing_origin_is_checked_by_policy() {
    let pipeline = Pipeline::builder(SecurityConfig::development())
        .origin_policy(security_pipeline::middleware::OriginPolicy::predicate(|origin| {
            !origin.is_empty()
        }))
        .build()
        .unwrap();
    let app = app(&pipeline);

    let response = get(&app, "/search").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"]["code"], "CORS_ORIGIN_DENIED");

    let mut config = SecurityConfig::development();
    config.cors_origins = vec!["https://good.com".to_string()];
    let listed = Pipeline::new(config).unwrap();
    assert_eq!(get(&self::app(&listed), "/search").await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_excluded_paths_are_never_audited() {
    let store = Arc::new(CountingStore::default());
    let mut config = SecurityConfig::production();
    config.audit_exclude_paths = vec!["/health".to_string(), "/internal/*".to_string()];
    let pipeline = Pipeline::builder(config)
        .audit_store(store.clone())
        .build()
        .unwrap();
    let app = app(&pipeline);

    for uri in ["/health", "/internal/fail", "/health", "/internal/fail"] {
        let response = app
            .clone()
            .oneshot(request(Method::GET, uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status() == StatusCode::OK || response.status().is_server_error());
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);

    app.oneshot(request(Method::GET, "/search").body(Body::empty()).unwrap())
        .await
        .unwrap();
    for _ in 0..100 {
        if store.saves.load(Ordering::SeqCst) == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("audited route was not saved");
}

#[tokio::test]
async fn test_audit_records_redacted_login_failure() {
    let mut config = SecurityConfig::production();
    config.audit_include_body = true;
    let pipeline = Pipeline::new(config).unwrap();
    let store = pipeline.audit_store();

    let response = app(&pipeline)
        .oneshot(json_request(
            "/api/auth/login",
            json!({"username": "alice", "password": "wrong", "meta": {"apiKey": "k-1"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let events = wait_for_events(&store, 1).await;
    let event = &events[0];
    assert_eq!(event.event_type, AuditEventType::LoginFailure);
    assert_eq!(event.source_ip.as_deref(), Some("198.51.100.10"));

    let metadata = event.metadata.as_ref().unwrap();
    assert_eq!(metadata["statusCode"], 401);
    assert_eq!(metadata["body"]["username"], "alice");
    assert_eq!(metadata["body"]["password"], REDACTION_MARKER);
    assert_eq!(metadata["body"]["meta"]["apiKey"], REDACTION_MARKER);
    assert!(!serde_json::to_string(event).unwrap().contains("wrong"));
}

#[tokio::test]
async fn test_rejections_are_audited() {
    let mut config = SecurityConfig::production();
    config.rate_limit.max_requests = 1;
    let pipeline = Pipeline::builder(config)
        .clock(Arc::new(MockClock::default()))
        .build()
        .unwrap();
    let store = pipeline.audit_store();
    let app = app(&pipeline);

    for _ in 0..2 {
        app.clone()
            .oneshot(request(Method::GET, "/search").body(Body::empty()).unwrap())
            .await
            .unwrap();
    }

    let events = wait_for_events(&store, 2).await;
    assert!(events
        .iter()
        .any(|e| e.event_type == AuditEventType::RateLimitExceeded));
}

#[tokio::test]
async fn test_principal_and_annotation_reach_the_event() {
    let pipeline = Pipeline::new(SecurityConfig::production()).unwrap();
    let store = pipeline.audit_store();

    let response = app(&pipeline)
        .oneshot({
            let mut req = request(Method::GET, "/trap").body(Body::empty()).unwrap();
            req.extensions_mut()
                .insert(Principal::user("u-1", "alice").with_roles(["admin"]));
            req
        })
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = wait_for_events(&store, 1).await;
    let event = &events[0];
    assert_eq!(event.event_type, AuditEventType::SecurityViolation);
    assert_eq!(event.action, "honeypot.hit");
    assert_eq!(event.actor.id.as_deref(), Some("u-1"));
    assert_eq!(event.actor.identifier, "alice");
}

#[tokio::test]
async fn test_failing_audit_store_does_not_affect_response() {
    let pipeline = tokio_test::assert_ok!(Pipeline::builder(SecurityConfig::production())
        .audit_store(Arc::new(BrokenStore))
        .build());

    let response = app(&pipeline)
        .oneshot(json_request("/echo", json!({"ok": true})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"ok": true}));

    for _ in 0..100 {
        if pipeline.metrics().get_metrics().audit_events_failed == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("audit failure was not counted");
}

#[tokio::test]
async fn test_admin_audit_query() {
    let store: Arc<dyn AuditStore> = Arc::new(InMemoryAuditStore::new(100));
    let pipeline = Pipeline::builder(SecurityConfig::production())
        .audit_store(store.clone())
        .build()
        .unwrap();
    let app = app(&pipeline).merge(audit_routes(pipeline.audit_store()));

    app.clone()
        .oneshot(json_request("/echo", json!({"a": 1})))
        .await
        .unwrap();
    app.clone()
        .oneshot(request(Method::GET, "/search").body(Body::empty()).unwrap())
        .await
        .unwrap();
    wait_for_events(&store, 2).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/audit?eventType=data_created&limit=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["events"][0]["eventType"], "data_created");

    let response = app
        .oneshot(Request::builder().uri("/admin/audit/verify").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(response).await["isValid"], true);
}
