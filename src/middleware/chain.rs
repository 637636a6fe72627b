//! Ordered security chain
//!
//! Stages always run in the same order:
//!
//! 1. CORS resolution (may reject, answers preflights)
//! 2. Header hardening
//! 3. Structural injection defense
//! 4. Parameter pollution defense
//! 5. Rate limiting (may reject)
//! 6. Sanitization
//!
//! A disabled stage is simply absent from the chain. The first stage that
//! rejects ends evaluation; later stages and the route handler never run.
//!
//! Only CORS and rate limiting can reject, and neither reads the inputs the
//! other stages rewrite. Evaluation is therefore split in two: [`screen`]
//! runs the admission stages on the request as received, before the body is
//! read, and [`transform`] runs the rewriting stages once the body has been
//! decoded. Relative order within each group is preserved.
//!
//! [`screen`]: SecurityChain::screen
//! [`transform`]: SecurityChain::transform

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::cors::{Cors, CorsDecision};
use super::headers::{HeaderHardening, REMOVED_HEADERS};
use super::hpp::PollutionGuard;
use super::injection::InjectionGuard;
use super::rate_limiter::{KeyStrategy, RateLimitError, RateLimitKey, RateLimitStatus, RateLimiter};
use super::request::SecurityRequest;
use super::sanitizer::Sanitizer;
use super::BodyGuardError;
use crate::observability::MetricsCollector;

/// Derives the rate-limit key for a request
pub type KeyFn = Arc<dyn Fn(&SecurityRequest) -> RateLimitKey + Send + Sync>;

/// Builds the response for a rate-limited request in place of the default 429
pub type LimitHandler = Arc<dyn Fn(&SecurityRequest, &RateLimitError) -> Rejection + Send + Sync>;

/// Category of a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    CorsDenied,
    RateLimited,
    PayloadTooLarge,
    UnsupportedMediaType,
    MalformedBody,
    Custom,
}

impl RejectionKind {
    /// Metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::CorsDenied => "cors",
            RejectionKind::RateLimited => "rate_limit",
            RejectionKind::PayloadTooLarge => "payload_too_large",
            RejectionKind::UnsupportedMediaType => "unsupported_media_type",
            RejectionKind::MalformedBody => "malformed_body",
            RejectionKind::Custom => "custom",
        }
    }
}

/// Terminal response produced by a stage
///
/// Rendered as `{"error": {"message": .., "code": .., "details": ..}}`.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: StatusCode,
    pub kind: RejectionKind,
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
    pub headers: HeaderMap,
}

impl Rejection {
    pub fn new(status: StatusCode, kind: RejectionKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            code: code.into(),
            message: message.into(),
            details: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn custom(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(status, RejectionKind::Custom, code, message)
    }

    pub fn cors_denied(origin: Option<&str>) -> Self {
        let rejection = Self::new(
            StatusCode::FORBIDDEN,
            RejectionKind::CorsDenied,
            "CORS_ORIGIN_DENIED",
            "Origin not allowed",
        );
        match origin {
            Some(origin) => rejection.with_details(json!({ "origin": origin })),
            None => rejection,
        }
    }

    pub fn rate_limited(err: &RateLimitError) -> Self {
        let RateLimitError::LimitExceeded { retry_after, limit } = err;
        // Round up so clients never retry early
        let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            RejectionKind::RateLimited,
            "RATE_LIMIT_EXCEEDED",
            "Too many requests, please try again later",
        )
        .with_details(json!({ "limit": limit, "retryAfterSeconds": retry_secs }))
        .with_header(header::RETRY_AFTER, HeaderValue::from(retry_secs))
        .with_header(HeaderName::from_static("ratelimit-limit"), HeaderValue::from(*limit))
        .with_header(HeaderName::from_static("ratelimit-remaining"), HeaderValue::from_static("0"))
    }

    pub fn from_body_error(err: &BodyGuardError) -> Self {
        match err {
            BodyGuardError::TooLarge { limit } => Self::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                RejectionKind::PayloadTooLarge,
                "PAYLOAD_TOO_LARGE",
                "Request body too large",
            )
            .with_details(json!({ "limitBytes": limit })),
            BodyGuardError::UnsupportedMediaType(content_type) => Self::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                RejectionKind::UnsupportedMediaType,
                "UNSUPPORTED_MEDIA_TYPE",
                "Unsupported content type",
            )
            .with_details(json!({ "contentType": content_type })),
            BodyGuardError::Malformed(_) | BodyGuardError::Read(_) => Self::new(
                StatusCode::BAD_REQUEST,
                RejectionKind::MalformedBody,
                "MALFORMED_BODY",
                "Request body could not be parsed",
            ),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// JSON error body
    pub fn body(&self) -> Value {
        let mut error = json!({
            "message": self.message,
            "code": self.code,
        });
        if let (Some(details), Value::Object(map)) = (&self.details, &mut error) {
            map.insert("details".to_string(), details.clone());
        }
        json!({ "error": error })
    }

    /// Add headers produced by earlier stages without overriding our own
    fn merge_headers(&mut self, earlier: &HeaderMap) {
        merge_missing(&mut self.headers, earlier);
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = self.body();
        let mut response = (self.status, Json(body)).into_response();
        merge_headers_into(response.headers_mut(), &self.headers);
        response
    }
}

/// Request admitted by the chain
#[derive(Debug, Clone)]
pub struct Admitted {
    /// Request with neutralized, collapsed and sanitized inputs
    pub request: SecurityRequest,
    /// Headers to add to the eventual response
    pub response_headers: HeaderMap,
    /// Headers to strip from the eventual response
    pub remove_headers: Vec<HeaderName>,
    pub rate_limit: Option<RateLimitStatus>,
    /// Original names of neutralized keys
    pub neutralized_keys: Vec<String>,
    /// Query parameters collapsed to a single value
    pub polluted_params: Vec<String>,
}

impl Admitted {
    /// Apply the collected header changes to a handler response
    pub fn decorate(&self, headers: &mut HeaderMap) {
        for name in &self.remove_headers {
            headers.remove(name);
        }
        merge_headers_into(headers, &self.response_headers);
    }
}

/// Chain outcome
#[derive(Debug, Clone)]
pub enum Verdict {
    Continue(Box<Admitted>),
    /// Allowed preflight, answered with 204 and these headers
    Preflight(HeaderMap),
    Reject(Rejection),
}

impl Verdict {
    pub fn is_continue(&self) -> bool {
        matches!(self, Verdict::Continue(_))
    }
}

/// Rate limiting stage
#[derive(Clone)]
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    key_fn: Option<KeyFn>,
    on_limited: Option<LimitHandler>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            key_fn: None,
            on_limited: None,
        }
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = Some(key_fn);
        self
    }

    pub fn with_handler(mut self, handler: LimitHandler) -> Self {
        self.on_limited = Some(handler);
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn key_for(&self, req: &SecurityRequest) -> RateLimitKey {
        match &self.key_fn {
            Some(key_fn) => key_fn(req),
            None => self.strategy().derive(req),
        }
    }

    fn strategy(&self) -> &KeyStrategy {
        &self.limiter.config().key_strategy
    }
}

impl fmt::Debug for RateLimitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitStage")
            .field("custom_key_fn", &self.key_fn.is_some())
            .field("custom_handler", &self.on_limited.is_some())
            .finish()
    }
}

/// One step of the chain
#[derive(Debug, Clone)]
pub enum Stage {
    Cors(Cors),
    Headers(HeaderHardening),
    Injection(InjectionGuard),
    Pollution(PollutionGuard),
    RateLimit(RateLimitStage),
    Sanitize(Arc<Sanitizer>),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Cors(_) => "cors",
            Stage::Headers(_) => "headers",
            Stage::Injection(_) => "injection",
            Stage::Pollution(_) => "pollution",
            Stage::RateLimit(_) => "rate_limit",
            Stage::Sanitize(_) => "sanitize",
        }
    }
}

/// Composed security chain
#[derive(Debug, Clone, Default)]
pub struct SecurityChain {
    stages: Vec<Stage>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SecurityChain {
    pub fn builder() -> SecurityChainBuilder {
        SecurityChainBuilder::default()
    }

    /// Names of the enabled stages, in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn sanitizer(&self) -> Option<Arc<Sanitizer>> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::Sanitize(sanitizer) => Some(sanitizer.clone()),
            _ => None,
        })
    }

    pub fn rate_limiter(&self) -> Option<Arc<RateLimiter>> {
        self.stages.iter().find_map(|stage| match stage {
            Stage::RateLimit(stage) => Some(stage.limiter().clone()),
            _ => None,
        })
    }

    /// Run every enabled stage: [`screen`](Self::screen) then
    /// [`transform`](Self::transform)
    pub async fn apply(&self, request: SecurityRequest) -> Verdict {
        match self.screen(request).await {
            Verdict::Continue(admitted) => Verdict::Continue(Box::new(self.transform(*admitted))),
            other => other,
        }
    }

    /// Run the stages that decide admission: CORS, header hardening and rate
    /// limiting
    ///
    /// They only look at method, path, headers and caller identity, so the
    /// adapter runs them before reading the body. A refused origin or an
    /// exhausted bucket is answered without buffering or parsing anything.
    pub async fn screen(&self, request: SecurityRequest) -> Verdict {
        let mut response_headers = HeaderMap::new();
        let mut remove_headers = Vec::new();
        let mut rate_limit = None;

        for stage in &self.stages {
            match stage {
                Stage::Cors(cors) => match cors.evaluate(&request).await {
                    CorsDecision::Allowed { headers, preflight } => {
                        merge_headers_into(&mut response_headers, &headers);
                        if preflight {
                            return Verdict::Preflight(response_headers);
                        }
                    }
                    CorsDecision::Denied { origin, .. } => {
                        return self.reject(Rejection::cors_denied(origin.as_deref()), &response_headers);
                    }
                },
                Stage::Headers(hardening) => {
                    hardening.apply(&mut response_headers);
                    remove_headers.extend(REMOVED_HEADERS.iter().copied().map(HeaderName::from_static));
                }
                Stage::RateLimit(stage) => {
                    let key = stage.key_for(&request);
                    match stage.limiter.check(&key, 1) {
                        Ok(status) => {
                            response_headers.insert(
                                HeaderName::from_static("ratelimit-limit"),
                                HeaderValue::from(status.limit),
                            );
                            response_headers.insert(
                                HeaderName::from_static("ratelimit-remaining"),
                                HeaderValue::from(status.remaining),
                            );
                            rate_limit = Some(status);
                        }
                        Err(err) => {
                            let rejection = match &stage.on_limited {
                                Some(handler) => handler(&request, &err),
                                None => Rejection::rate_limited(&err),
                            };
                            return self.reject(rejection, &response_headers);
                        }
                    }
                }
                Stage::Injection(_) | Stage::Pollution(_) | Stage::Sanitize(_) => {}
            }
        }

        Verdict::Continue(Box::new(Admitted {
            request,
            response_headers,
            remove_headers,
            rate_limit,
            neutralized_keys: Vec::new(),
            polluted_params: Vec::new(),
        }))
    }

    /// Rewrite the inputs of a screened request: injection neutralization,
    /// pollution collapse, then sanitization. These stages never reject.
    pub fn transform(&self, mut admitted: Admitted) -> Admitted {
        let request = &mut admitted.request;

        for stage in &self.stages {
            match stage {
                Stage::Injection(guard) => {
                    let mut renamed = guard.neutralize("body", &mut request.body);
                    renamed.extend(guard.neutralize("query", &mut request.query));
                    if !renamed.is_empty() {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_injection_neutralized(renamed.len());
                        }
                        admitted.neutralized_keys.extend(renamed);
                    }
                }
                Stage::Pollution(guard) => {
                    let collapsed = guard.collapse(&mut request.query);
                    if !collapsed.is_empty() {
                        if let Some(metrics) = &self.metrics {
                            metrics.record_pollution_collapsed(collapsed.len());
                        }
                        admitted.polluted_params.extend(collapsed);
                    }
                }
                Stage::Sanitize(sanitizer) => {
                    // Channels are independent; each is cleaned on its own
                    sanitizer.sanitize_in_place(&mut request.body);
                    sanitizer.sanitize_in_place(&mut request.query);
                    sanitizer.sanitize_in_place(&mut request.path_params);
                }
                Stage::Cors(_) | Stage::Headers(_) | Stage::RateLimit(_) => {}
            }
        }

        debug!(method = %request.method, path = %request.path, "Request admitted by security chain");
        admitted
    }

    /// Reject a request that already passed [`screen`](Self::screen), e.g.
    /// because its body was refused; the rejection carries the CORS,
    /// hardening and rate-limit headers the screen produced
    pub fn reject_screened(&self, rejection: Rejection, admitted: &Admitted) -> Rejection {
        self.finish_rejection(rejection, &admitted.response_headers)
    }

    fn reject(&self, rejection: Rejection, earlier: &HeaderMap) -> Verdict {
        Verdict::Reject(self.finish_rejection(rejection, earlier))
    }

    fn finish_rejection(&self, mut rejection: Rejection, earlier: &HeaderMap) -> Rejection {
        warn!(
            kind = rejection.kind.as_str(),
            status = rejection.status.as_u16(),
            "Request rejected by security chain"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_rejection(rejection.kind.as_str());
        }
        rejection.merge_headers(earlier);
        rejection
    }
}

/// Builder assembling stages into their fixed order
#[derive(Default)]
pub struct SecurityChainBuilder {
    cors: Option<Cors>,
    headers: Option<HeaderHardening>,
    injection: Option<InjectionGuard>,
    pollution: Option<PollutionGuard>,
    rate_limit: Option<RateLimitStage>,
    sanitize: Option<Arc<Sanitizer>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SecurityChainBuilder {
    pub fn cors(mut self, cors: Cors) -> Self {
        self.cors = Some(cors);
        self
    }

    pub fn headers(mut self, hardening: HeaderHardening) -> Self {
        self.headers = Some(hardening);
        self
    }

    pub fn injection(mut self, guard: InjectionGuard) -> Self {
        self.injection = Some(guard);
        self
    }

    pub fn pollution(mut self, guard: PollutionGuard) -> Self {
        self.pollution = Some(guard);
        self
    }

    pub fn rate_limit(mut self, stage: RateLimitStage) -> Self {
        self.rate_limit = Some(stage);
        self
    }

    pub fn sanitize(mut self, sanitizer: Arc<Sanitizer>) -> Self {
        self.sanitize = Some(sanitizer);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Stages are emitted in the fixed order regardless of call order
    pub fn build(self) -> SecurityChain {
        let stages = [
            self.cors.map(Stage::Cors),
            self.headers.map(Stage::Headers),
            self.injection.map(Stage::Injection),
            self.pollution.map(Stage::Pollution),
            self.rate_limit.map(Stage::RateLimit),
            self.sanitize.map(Stage::Sanitize),
        ]
        .into_iter()
        .flatten()
        .collect();

        SecurityChain {
            stages,
            metrics: self.metrics,
        }
    }
}

/// `Vary` accumulates; every other header is overwritten
fn merge_headers_into(target: &mut HeaderMap, source: &HeaderMap) {
    for name in source.keys() {
        if name == header::VARY {
            for value in source.get_all(name) {
                target.append(name.clone(), value.clone());
            }
        } else if let Some(value) = source.get(name) {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn merge_missing(target: &mut HeaderMap, source: &HeaderMap) {
    for name in source.keys() {
        if name == header::VARY || !target.contains_key(name) {
            for value in source.get_all(name) {
                target.append(name.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::clock::MockClock;
    use crate::middleware::cors::{CorsConfig, OriginPolicy};
    use crate::middleware::headers::HeaderHardeningConfig;
    use crate::middleware::rate_limiter::RateLimitConfig;
    use axum::http::Method;
    use serde_json::json;

    fn limiter(max_requests: u32) -> Arc<RateLimiter> {
        let config = RateLimitConfig {
            max_requests,
            window_seconds: 60,
            ..Default::default()
        };
        Arc::new(RateLimiter::with_clock(config, Arc::new(MockClock::default())).unwrap())
    }

    fn full_chain(max_requests: u32) -> SecurityChain {
        SecurityChain::builder()
            .sanitize(Arc::new(Sanitizer::default()))
            .rate_limit(RateLimitStage::new(limiter(max_requests)))
            .pollution(PollutionGuard::default())
            .injection(InjectionGuard::default())
            .headers(HeaderHardening::new(HeaderHardeningConfig::default()).unwrap())
            .cors(
                Cors::new(
                    OriginPolicy::allow_list(["https://app.example.com"]),
                    CorsConfig { credentials: true, ..Default::default() },
                )
                .unwrap(),
            )
            .build()
    }

    fn admitted(verdict: Verdict) -> Admitted {
        match verdict {
            Verdict::Continue(admitted) => *admitted,
            other => panic!("expected admission, got {:?}", other),
        }
    }

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(
            full_chain(10).stage_names(),
            vec!["cors", "headers", "injection", "pollution", "rate_limit", "sanitize"]
        );
    }

    #[test]
    fn test_disabled_stages_are_absent() {
        let chain = SecurityChain::builder()
            .sanitize(Arc::new(Sanitizer::default()))
            .cors(Cors::new(OriginPolicy::AllowAll, CorsConfig::default()).unwrap())
            .build();
        assert_eq!(chain.stage_names(), vec!["cors", "sanitize"]);
        assert!(chain.rate_limiter().is_none());
    }

    #[tokio::test]
    async fn test_injection_then_sanitize() {
        let chain = full_chain(10);
        let request = SecurityRequest::new(Method::POST, "/api/users")
            .with_origin("https://app.example.com")
            .with_body(json!({"$gt": "", "name": "<script>x</script>"}));

        let admitted = admitted(chain.apply(request).await);
        assert_eq!(
            admitted.request.body,
            json!({"_$gt": "", "name": "&lt;script&gt;x&lt;/script&gt;"})
        );
        assert_eq!(admitted.neutralized_keys, vec!["$gt".to_string()]);
        assert_eq!(
            admitted.response_headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert_eq!(admitted.response_headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(admitted.response_headers["x-content-type-options"], "nosniff");
        assert_eq!(admitted.response_headers["ratelimit-remaining"], "9");
    }

    #[tokio::test]
    async fn test_pollution_collapsed_before_sanitize() {
        let chain = full_chain(10);
        let request = SecurityRequest::new(Method::GET, "/api/users")
            .with_origin("https://app.example.com")
            .with_query_string("sort=name&sort=%3Cb%3E")
            .with_path_param("id", " <1> ");

        let admitted = admitted(chain.apply(request).await);
        assert_eq!(admitted.request.query, json!({"sort": "&lt;b&gt;"}));
        assert_eq!(admitted.request.path_params, json!({"id": "&lt;1&gt;"}));
        assert_eq!(admitted.polluted_params, vec!["sort".to_string()]);
    }

    #[tokio::test]
    async fn test_denied_origin_short_circuits() {
        let chain = full_chain(1);
        let request = SecurityRequest::new(Method::GET, "/api/users")
            .with_origin("https://evil.com")
            .with_client_ip("10.0.0.1".parse().unwrap());

        match chain.apply(request.clone()).await {
            Verdict::Reject(rejection) => {
                assert_eq!(rejection.status, StatusCode::FORBIDDEN);
                assert_eq!(rejection.kind, RejectionKind::CorsDenied);
                // Hardening never ran
                assert!(!rejection.headers.contains_key("x-content-type-options"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        // The rate limiter was never consulted, so the single token is still there
        let allowed = request.with_origin("https://app.example.com");
        assert!(chain.apply(allowed).await.is_continue());
    }

    #[tokio::test]
    async fn test_rate_limit_rejection() {
        let chain = full_chain(1);
        let request = SecurityRequest::new(Method::GET, "/")
            .with_origin("https://app.example.com")
            .with_client_ip("10.0.0.1".parse().unwrap());

        assert!(chain.apply(request.clone()).await.is_continue());
        match chain.apply(request).await {
            Verdict::Reject(rejection) => {
                assert_eq!(rejection.status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(rejection.headers[header::RETRY_AFTER], "60");
                // Earlier stages' headers survive on the rejection
                assert_eq!(rejection.headers["x-frame-options"], "SAMEORIGIN");
                assert_eq!(
                    rejection.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
                    "https://app.example.com"
                );
                assert_eq!(rejection.body()["error"]["code"], "RATE_LIMIT_EXCEEDED");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_custom_key_fn_and_handler() {
        let stage = RateLimitStage::new(limiter(1))
            .with_key_fn(Arc::new(|req: &SecurityRequest| {
                RateLimitKey::new(req.path.clone())
            }))
            .with_handler(Arc::new(|_req: &SecurityRequest, _err: &RateLimitError| {
                Rejection::custom(StatusCode::SERVICE_UNAVAILABLE, "SLOW_DOWN", "Busy")
            }));
        let chain = SecurityChain::builder().rate_limit(stage).build();

        assert!(chain.apply(SecurityRequest::new(Method::GET, "/a")).await.is_continue());
        assert!(chain.apply(SecurityRequest::new(Method::GET, "/b")).await.is_continue());
        match chain.apply(SecurityRequest::new(Method::GET, "/a")).await {
            Verdict::Reject(rejection) => {
                assert_eq!(rejection.status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(rejection.code, "SLOW_DOWN");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_preflight_terminates_chain() {
        let chain = full_chain(1);
        let preflight = SecurityRequest::new(Method::OPTIONS, "/api/users")
            .with_origin("https://app.example.com")
            .with_header(header::ACCESS_CONTROL_REQUEST_METHOD, HeaderValue::from_static("POST"));

        for _ in 0..3 {
            match chain.apply(preflight.clone()).await {
                Verdict::Preflight(headers) => {
                    assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
                }
                other => panic!("expected preflight, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_screen_leaves_inputs_untouched() {
        let chain = full_chain(10);
        let request = SecurityRequest::new(Method::POST, "/api/users")
            .with_origin("https://app.example.com")
            .with_body(json!({"$gt": "<b>"}));

        let screened = admitted(chain.screen(request).await);
        assert_eq!(screened.request.body, json!({"$gt": "<b>"}));
        assert_eq!(screened.response_headers["ratelimit-remaining"], "9");
        assert_eq!(screened.response_headers["x-content-type-options"], "nosniff");

        let transformed = chain.transform(screened);
        assert_eq!(transformed.request.body, json!({"_$gt": "&lt;b&gt;"}));
        assert_eq!(transformed.neutralized_keys, vec!["$gt".to_string()]);
    }

    #[tokio::test]
    async fn test_screened_rejection_keeps_headers() {
        let chain = full_chain(10);
        let request = SecurityRequest::new(Method::POST, "/api/users")
            .with_origin("https://app.example.com");

        let screened = admitted(chain.screen(request).await);
        let rejection = chain.reject_screened(
            Rejection::from_body_error(&BodyGuardError::TooLarge { limit: 16 }),
            &screened,
        );
        assert_eq!(rejection.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            rejection.headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example.com"
        );
        assert_eq!(rejection.headers["ratelimit-remaining"], "9");
    }

    #[test]
    fn test_rejection_body_shape() {
        let rejection = Rejection::cors_denied(Some("https://evil.com"));
        assert_eq!(
            rejection.body(),
            json!({"error": {
                "message": "Origin not allowed",
                "code": "CORS_ORIGIN_DENIED",
                "details": {"origin": "https://evil.com"},
            }})
        );

        let plain = Rejection::custom(StatusCode::BAD_REQUEST, "BAD", "bad");
        assert!(plain.body()["error"].get("details").is_none());
    }

    #[test]
    fn test_body_errors_map_to_statuses() {
        let too_large = Rejection::from_body_error(&BodyGuardError::TooLarge { limit: 10 });
        assert_eq!(too_large.status, StatusCode::PAYLOAD_TOO_LARGE);

        let media = Rejection::from_body_error(&BodyGuardError::UnsupportedMediaType("text/xml".into()));
        assert_eq!(media.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let malformed = Rejection::from_body_error(&BodyGuardError::Malformed("eof".into()));
        assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
    }
}
