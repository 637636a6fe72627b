//! Pipeline composition root and axum adapters
//!
//! [`Pipeline::builder`] validates a [`SecurityConfig`], builds every enabled
//! stage and wires in the programmatic collaborators (audit store, origin
//! predicate, rate-limit key function, clock). [`Pipeline::attach`] layers
//! the two adapters onto a router:
//!
//! ```text
//! audit_middleware        (outermost: sees rejections too)
//!   security_middleware   (chain screen, body guard, chain transform)
//!     handler
//! ```

use axum::{
    extract::{ConnectInfo, FromRequestParts, RawPathParams, Request, State},
    http::{header, request::Parts, uri::PathAndQuery, HeaderMap, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Router,
};
use serde_json::{Map, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::audit::{
    AuditAnnotation, AuditContext, AuditMiddleware, AuditStore, InMemoryAuditStore, RouteOverride,
};
use crate::config::SecurityConfig;
use crate::error::Result;
use crate::middleware::{
    request::query_to_value, request::value_to_query, BodyGuard, BodyKind, Clock, Cors,
    HeaderHardening, InjectionGuard, KeyFn, LimitHandler, OriginPolicy, PollutionGuard,
    Principal, RateLimitError, RateLimitKey, RateLimitStage, RateLimiter, Rejection,
    SanitizedInput, Sanitizer, SecurityChain, SecurityRequest, SystemClock, Verdict,
};
use crate::observability::MetricsCollector;
use crate::shutdown::ShutdownNotifier;

/// Header carrying the correlation id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Assembled security pipeline
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    config: SecurityConfig,
    chain: SecurityChain,
    body_guard: BodyGuard,
    audit: Arc<AuditMiddleware>,
    metrics: Arc<MetricsCollector>,
}

impl Pipeline {
    pub fn builder(config: SecurityConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Pipeline with default collaborators
    pub fn new(config: SecurityConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.inner.config
    }

    pub fn chain(&self) -> &SecurityChain {
        &self.inner.chain
    }

    pub fn body_guard(&self) -> &BodyGuard {
        &self.inner.body_guard
    }

    pub fn audit(&self) -> &Arc<AuditMiddleware> {
        &self.inner.audit
    }

    pub fn audit_store(&self) -> Arc<dyn AuditStore> {
        self.inner.audit.store().clone()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.inner.metrics
    }

    /// Layer the security and audit adapters onto `router`
    pub fn attach<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(axum::middleware::from_fn_with_state(self.clone(), security_middleware))
            .layer(axum::middleware::from_fn_with_state(self.clone(), audit_middleware))
    }

    /// Start the rate-limit bucket sweep, if rate limiting is enabled
    pub fn start_background_tasks(&self, shutdown: ShutdownNotifier) -> Option<tokio::task::JoinHandle<()>> {
        self.inner.chain.rate_limiter().map(|limiter| {
            info!("Starting rate limit sweep task");
            limiter.start_sweep_task(shutdown)
        })
    }
}

/// Builder for [`Pipeline`]
pub struct PipelineBuilder {
    config: SecurityConfig,
    audit_store: Option<Arc<dyn AuditStore>>,
    origin_policy: Option<OriginPolicy>,
    key_fn: Option<KeyFn>,
    on_rate_limited: Option<LimitHandler>,
    clock: Option<Arc<dyn Clock>>,
    metrics: Option<Arc<MetricsCollector>>,
    route_overrides: Vec<(String, RouteOverride)>,
}

impl PipelineBuilder {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            audit_store: None,
            origin_policy: None,
            key_fn: None,
            on_rate_limited: None,
            clock: None,
            metrics: None,
            route_overrides: Vec::new(),
        }
    }

    /// Audit backend; defaults to an in-memory ring buffer
    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    /// Origin policy; overrides `cors_origins` (e.g. with a predicate)
    pub fn origin_policy(mut self, policy: OriginPolicy) -> Self {
        self.origin_policy = Some(policy);
        self
    }

    /// Custom rate-limit key derivation
    pub fn rate_limit_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&SecurityRequest) -> RateLimitKey + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(f));
        self
    }

    /// Custom response for rate-limited requests
    pub fn on_rate_limited<F>(mut self, f: F) -> Self
    where
        F: Fn(&SecurityRequest, &RateLimitError) -> Rejection + Send + Sync + 'static,
    {
        self.on_rate_limited = Some(Arc::new(f));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn audit_route_override(mut self, pattern: impl Into<String>, route: RouteOverride) -> Self {
        self.route_overrides.push((pattern.into(), route));
        self
    }

    /// Validate the configuration and build every enabled stage
    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        config.validate()?;

        let metrics = self.metrics.unwrap_or_else(|| Arc::new(MetricsCollector::new()));
        let mut chain = SecurityChain::builder().metrics(metrics.clone());

        let policy = self
            .origin_policy
            .or_else(|| config.cors_enabled().then(|| config.origin_policy()));
        if let Some(policy) = policy {
            chain = chain.cors(Cors::new(policy, config.cors_config())?);
        }
        if config.helmet_enabled {
            chain = chain.headers(HeaderHardening::new(config.helmet.clone())?);
        }
        if config.no_sql_injection_guard_enabled {
            chain = chain.injection(InjectionGuard::new(config.injection_config()));
        }
        if config.hpp_enabled {
            chain = chain.pollution(PollutionGuard::new(config.hpp_whitelist.iter()));
        }
        if config.rate_limit.enabled {
            let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
            let limiter = Arc::new(RateLimiter::with_clock(config.rate_limit.clone(), clock)?);
            let mut stage = RateLimitStage::new(limiter);
            if let Some(key_fn) = self.key_fn {
                stage = stage.with_key_fn(key_fn);
            }
            if let Some(handler) = self.on_rate_limited {
                stage = stage.with_handler(handler);
            }
            chain = chain.rate_limit(stage);
        }
        if config.sanitize_stage_enabled() {
            chain = chain.sanitize(Arc::new(Sanitizer::new(config.sanitizer_options())));
        }
        let chain = chain.build();

        let body_guard = BodyGuard::new(config.body_limit_config())?;

        let store = match self.audit_store {
            Some(store) => store,
            None => {
                let mut store = InMemoryAuditStore::new(config.audit_max_events);
                if let Some(key) = config.chain_key() {
                    store = store.with_chain_key(key);
                }
                Arc::new(store)
            }
        };
        let audit = self
            .route_overrides
            .into_iter()
            .fold(
                AuditMiddleware::new(store, config.audit_options()).with_metrics(metrics.clone()),
                |audit, (pattern, route)| audit.with_route_override(pattern, route),
            );

        info!(
            stages = ?chain.stage_names(),
            audit_enabled = config.audit_enabled,
            max_body_bytes = config.max_body_bytes,
            "Security pipeline built"
        );

        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                config,
                chain,
                body_guard,
                audit: Arc::new(audit),
                metrics,
            }),
        })
    }
}

/// [`SecurityChain`] and body guard around the handler
///
/// CORS and rate limiting run before the body is read; injection, pollution
/// and sanitization run on the decoded body.
///
/// Admitted requests reach the handler with the rewritten body and query
/// string and a [`SanitizedInput`] extension. The same extension is copied
/// onto the response for the audit adapter.
pub async fn security_middleware(
    State(pipeline): State<Pipeline>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let response = run_security(&pipeline, req, next).await;
    pipeline.metrics().record_request(started.elapsed());
    response
}

async fn run_security(pipeline: &Pipeline, req: Request, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();
    let request = security_request(&mut parts).await;
    let chain = pipeline.chain();

    // Admission first: refused origins and exhausted buckets never cost a body read
    let mut admitted = match chain.screen(request).await {
        Verdict::Continue(admitted) => admitted,
        Verdict::Preflight(headers) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            response.headers_mut().extend(headers);
            return response;
        }
        Verdict::Reject(rejection) => return rejection.into_response(),
    };

    let decoded = match pipeline.body_guard().read(&parts.headers, body).await {
        Ok(decoded) => decoded,
        Err(err) => {
            return chain
                .reject_screened(Rejection::from_body_error(&err), &admitted)
                .into_response();
        }
    };
    admitted.request.body = decoded.tree.clone();
    let admitted = chain.transform(*admitted);
    let had_query = parts.uri.query().is_some();

    let bytes = match decoded.encode(&admitted.request.body) {
        Ok(bytes) => bytes,
        Err(err) => {
            return chain
                .reject_screened(Rejection::from_body_error(&err), &admitted)
                .into_response();
        }
    };
    if matches!(decoded.kind, BodyKind::Json | BodyKind::Form) {
        parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    }

    if had_query {
        if let Err(rejection) = rewrite_query(&mut parts, &admitted.request.query) {
            return chain.reject_screened(rejection, &admitted).into_response();
        }
    }

    let input = SanitizedInput {
        body: admitted.request.body.clone(),
        query: admitted.request.query.clone(),
        path_params: admitted.request.path_params.clone(),
    };
    parts.extensions.insert(input.clone());
    if let Some(sanitizer) = chain.sanitizer() {
        parts.extensions.insert(sanitizer);
    }

    let mut response = next.run(Request::from_parts(parts, bytes.into())).await;
    admitted.decorate(response.headers_mut());
    response.extensions_mut().insert(input);
    response
}

/// Collect the chain's view of an incoming request
async fn security_request(parts: &mut Parts) -> SecurityRequest {
    let mut request = SecurityRequest::new(parts.method.clone(), parts.uri.path());
    request.headers = parts.headers.clone();
    request.origin = parts
        .headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    request.query = parts
        .uri
        .query()
        .map(query_to_value)
        .unwrap_or_else(|| Value::Object(Map::new()));
    request.client_ip = client_ip(&parts.extensions, &parts.headers);
    request.principal = parts.extensions.get::<Principal>().cloned();

    // Only present when the adapter runs as a route layer
    if let Ok(params) = RawPathParams::from_request_parts(parts, &()).await {
        request.path_params = Value::Object(
            params
                .iter()
                .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
                .collect(),
        );
    }
    request
}

/// `ConnectInfo` address, then the first `X-Forwarded-For` entry
fn client_ip(extensions: &axum::http::Extensions, headers: &HeaderMap) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok())
        })
}

fn rewrite_query(parts: &mut Parts, query: &Value) -> std::result::Result<(), Rejection> {
    let encoded = value_to_query(query);
    let path_and_query = if encoded.is_empty() {
        parts.uri.path().to_string()
    } else {
        format!("{}?{}", parts.uri.path(), encoded)
    };

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.path_and_query = PathAndQuery::try_from(path_and_query).ok();
    match Uri::from_parts(uri_parts) {
        Ok(uri) => {
            parts.uri = uri;
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Failed to rebuild request URI from sanitized query");
            Err(Rejection::custom(
                StatusCode::BAD_REQUEST,
                "INVALID_QUERY",
                "Query string could not be processed",
            ))
        }
    }
}

/// Audit capture around everything inside it
///
/// The event is written from a spawned task so the save completes even if
/// the client goes away.
pub async fn audit_middleware(
    State(pipeline): State<Pipeline>,
    mut req: Request,
    next: Next,
) -> Response {
    let audit = pipeline.audit().clone();
    if !audit.should_audit(req.uri().path()) {
        return next.run(req).await;
    }

    let started = Instant::now();
    let correlation_id = match req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(id) => id.to_string(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            id
        }
    };

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let raw_query = req.uri().query().map(query_to_value).unwrap_or(Value::Null);
    let client_ip = client_ip(req.extensions(), req.headers());
    let principal = req.extensions().get::<Principal>().cloned();
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = next.run(req).await;

    let annotation = response.extensions_mut().remove::<AuditAnnotation>();
    let (query, body) = match response.extensions().get::<SanitizedInput>() {
        Some(input) => (input.query.clone(), input.body.clone()),
        None => (raw_query, Value::Null),
    };
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().entry(REQUEST_ID_HEADER).or_insert(value);
    }

    let ctx = AuditContext {
        method,
        path,
        status: response.status(),
        duration: started.elapsed(),
        principal,
        client_ip,
        user_agent,
        correlation_id: Some(correlation_id),
        query,
        body,
        annotation,
    };

    tokio::spawn(async move {
        let saved = audit.record(ctx).await;
        debug!(saved, "Audit capture finished");
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditQueryFilters;
    use axum::{body::Body, routing::get};
    use tower::ServiceExt;

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = SecurityConfig::production();
        config.rate_limit.max_requests = 0;
        assert!(Pipeline::new(config).is_err());

        let mut config = SecurityConfig::production();
        config.allowed_content_types.clear();
        assert!(Pipeline::new(config).is_err());
    }

    #[test]
    fn test_profiles_select_stages() {
        let production = Pipeline::new(SecurityConfig::production()).unwrap();
        assert_eq!(
            production.chain().stage_names(),
            vec!["cors", "headers", "injection", "pollution", "rate_limit", "sanitize"]
        );

        let development = Pipeline::new(SecurityConfig::development()).unwrap();
        assert_eq!(development.chain().stage_names(), vec!["cors", "sanitize"]);
    }

    #[test]
    fn test_origin_policy_override() {
        let mut config = SecurityConfig::development();
        config.cors_origins.clear();
        assert!(Pipeline::new(config.clone()).unwrap().chain().stage_names().iter().all(|s| *s != "cors"));

        let pipeline = Pipeline::builder(config)
            .origin_policy(OriginPolicy::predicate(|origin| origin.ends_with(".example.com")))
            .build()
            .unwrap();
        assert_eq!(pipeline.chain().stage_names()[0], "cors");
    }

    #[test]
    fn test_client_ip_resolution() {
        let mut extensions = axum::http::Extensions::new();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&extensions, &headers), Some("203.0.113.7".parse().unwrap()));

        extensions.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_ip(&extensions, &headers), Some("127.0.0.1".parse().unwrap()));

        assert_eq!(client_ip(&axum::http::Extensions::new(), &HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_request_id_is_propagated() {
        let pipeline = Pipeline::new(SecurityConfig::development()).unwrap();
        let app = pipeline.attach(Router::new().route("/items", get(|| async { "ok" })));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/items")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");

        // The audit write is spawned; give it a moment to land
        for _ in 0..50 {
            let events = pipeline.audit_store().query(&AuditQueryFilters::default()).await.unwrap();
            if let Some(event) = events.first() {
                assert_eq!(event.correlation_id.as_deref(), Some("req-42"));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("audit event was not recorded");
    }
}
