//! Cross-origin access control
//!
//! [`OriginResolver`] answers one question: may this origin talk to us?
//! [`Cors`] wraps a policy together with the header configuration and turns
//! the answer into response headers or a denial.

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::request::SecurityRequest;
use crate::error::{PipelineError, Result};

/// Error reported by an origin predicate; the resolver treats it as a denial
#[derive(Debug, Clone, thiserror::Error)]
#[error("Origin predicate failed: {0}")]
pub struct OriginPredicateError(pub String);

impl OriginPredicateError {
    pub fn new(err: impl fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// Decides whether an origin is allowed; may suspend (e.g. a database lookup)
#[async_trait]
pub trait OriginPredicate: Send + Sync {
    /// `origin` is empty when the request carried no `Origin` header
    async fn allows(&self, origin: &str) -> std::result::Result<bool, OriginPredicateError>;
}

struct SyncPredicate<F>(F);

#[async_trait]
impl<F> OriginPredicate for SyncPredicate<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    async fn allows(&self, origin: &str) -> std::result::Result<bool, OriginPredicateError> {
        Ok((self.0)(origin))
    }
}

type AsyncPredicateFn =
    dyn Fn(String) -> BoxFuture<'static, std::result::Result<bool, OriginPredicateError>> + Send + Sync;

struct AsyncPredicate(Box<AsyncPredicateFn>);

#[async_trait]
impl OriginPredicate for AsyncPredicate {
    async fn allows(&self, origin: &str) -> std::result::Result<bool, OriginPredicateError> {
        (self.0)(origin.to_string()).await
    }
}

/// Which origins are permitted; immutable once built
#[derive(Clone)]
pub enum OriginPolicy {
    AllowAll,
    /// Exact string equality against the set
    AllowList(Arc<HashSet<String>>),
    AllowPredicate(Arc<dyn OriginPredicate>),
}

impl OriginPolicy {
    pub fn allow_list<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OriginPolicy::AllowList(Arc::new(origins.into_iter().map(Into::into).collect()))
    }

    /// Policy from a synchronous function
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        OriginPolicy::AllowPredicate(Arc::new(SyncPredicate(f)))
    }

    /// Policy from an asynchronous function
    pub fn async_predicate<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<bool, OriginPredicateError>> + Send + 'static,
    {
        OriginPolicy::AllowPredicate(Arc::new(AsyncPredicate(Box::new(move |origin| {
            f(origin).boxed()
        }))))
    }

    /// Policy implied by a configured origin list: `*` alone means allow all
    pub fn from_origins(origins: &[String]) -> Self {
        if origins.iter().any(|o| o == "*") {
            OriginPolicy::AllowAll
        } else {
            Self::allow_list(origins.iter().cloned())
        }
    }

    pub fn is_allow_all(&self) -> bool {
        matches!(self, OriginPolicy::AllowAll)
    }
}

impl fmt::Debug for OriginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginPolicy::AllowAll => write!(f, "AllowAll"),
            OriginPolicy::AllowList(set) => f.debug_tuple("AllowList").field(set).finish(),
            OriginPolicy::AllowPredicate(_) => write!(f, "AllowPredicate(..)"),
        }
    }
}

/// Origin resolution
pub struct OriginResolver;

impl OriginResolver {
    /// Whether `origin` is permitted under `policy`
    ///
    /// Predicates run on their own task: a panic or error resolves to `false`,
    /// and the evaluation finishes even if the caller is dropped mid-way.
    pub async fn resolve(origin: Option<&str>, policy: &OriginPolicy) -> bool {
        match policy {
            OriginPolicy::AllowAll => true,
            OriginPolicy::AllowList(origins) => origin.is_some_and(|o| origins.contains(o)),
            OriginPolicy::AllowPredicate(predicate) => {
                let predicate = predicate.clone();
                let candidate = origin.unwrap_or_default().to_string();
                let task = tokio::spawn(async move { predicate.allows(&candidate).await });

                match task.await {
                    Ok(Ok(allowed)) => allowed,
                    Ok(Err(e)) => {
                        warn!(origin = origin.unwrap_or_default(), error = %e, "Origin predicate failed, denying");
                        false
                    }
                    Err(e) => {
                        error!(origin = origin.unwrap_or_default(), error = %e, "Origin predicate panicked, denying");
                        false
                    }
                }
            }
        }
    }
}

/// CORS header configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Send `Access-Control-Allow-Credentials: true`
    #[serde(default)]
    pub credentials: bool,

    #[serde(default = "default_methods")]
    pub methods: Vec<String>,

    /// Allowed request headers; empty mirrors `Access-Control-Request-Headers`
    #[serde(default)]
    pub allowed_headers: Vec<String>,

    #[serde(default)]
    pub exposed_headers: Vec<String>,

    /// Preflight cache lifetime
    #[serde(default = "default_max_age")]
    pub max_age_secs: Option<u64>,

    /// Deny requests without an `Origin` header even when the policy would
    /// admit them (allow-all, or a predicate accepting `""`)
    #[serde(default)]
    pub reject_missing_origin: bool,
}

fn default_methods() -> Vec<String> {
    ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}
fn default_max_age() -> Option<u64> { Some(600) }

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            credentials: false,
            methods: default_methods(),
            allowed_headers: Vec::new(),
            exposed_headers: Vec::new(),
            max_age_secs: default_max_age(),
            reject_missing_origin: false,
        }
    }
}

/// Result of evaluating a request against the CORS stage
#[derive(Debug, Clone)]
pub enum CorsDecision {
    /// Headers to set; `preflight` requests end here with 204
    Allowed { headers: HeaderMap, preflight: bool },
    Denied { origin: Option<String>, preflight: bool },
}

/// CORS stage
#[derive(Debug, Clone)]
pub struct Cors {
    policy: OriginPolicy,
    credentials: bool,
    reject_missing_origin: bool,
    methods: HeaderValue,
    allowed_headers: Option<HeaderValue>,
    exposed_headers: Option<HeaderValue>,
    max_age: Option<HeaderValue>,
}

impl Cors {
    pub fn new(policy: OriginPolicy, config: CorsConfig) -> Result<Self> {
        if config.methods.is_empty() {
            return Err(PipelineError::config("CORS methods must not be empty"));
        }

        Ok(Self {
            policy,
            credentials: config.credentials,
            reject_missing_origin: config.reject_missing_origin,
            methods: joined("methods", &config.methods)?
                .ok_or_else(|| PipelineError::config("CORS methods must not be empty"))?,
            allowed_headers: joined("allowed headers", &config.allowed_headers)?,
            exposed_headers: joined("exposed headers", &config.exposed_headers)?,
            max_age: config.max_age_secs.map(HeaderValue::from),
        })
    }

    pub fn policy(&self) -> &OriginPolicy {
        &self.policy
    }

    pub async fn evaluate(&self, req: &SecurityRequest) -> CorsDecision {
        let preflight = req.is_preflight();
        let origin = req.origin.as_deref();

        let missing_denied = origin.is_none() && self.reject_missing_origin;
        if missing_denied || !OriginResolver::resolve(origin, &self.policy).await {
            warn!(
                origin = origin.unwrap_or("<none>"),
                method = %req.method,
                path = %req.path,
                preflight,
                "CORS origin denied"
            );
            return CorsDecision::Denied {
                origin: origin.map(str::to_string),
                preflight,
            };
        }

        let mut headers = HeaderMap::new();
        if origin.is_none() {
            // Admitted without an origin: nothing to reflect
            if self.policy.is_allow_all() && !self.credentials {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            }
            if preflight {
                self.preflight_headers(req, &mut headers);
            }
            return CorsDecision::Allowed { headers, preflight };
        }

        self.origin_headers(origin, &mut headers);
        if preflight {
            self.preflight_headers(req, &mut headers);
        } else if let Some(exposed) = &self.exposed_headers {
            headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, exposed.clone());
        }

        debug!(origin = origin.unwrap_or("<none>"), preflight, "CORS origin allowed");
        CorsDecision::Allowed { headers, preflight }
    }

    fn origin_headers(&self, origin: Option<&str>, headers: &mut HeaderMap) {
        // Wildcard is invalid together with credentials, so reflect instead
        let reflected = match origin {
            Some(o) if !self.policy.is_allow_all() || self.credentials => HeaderValue::from_str(o).ok(),
            _ => None,
        };

        match reflected {
            Some(value) => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
                headers.append(header::VARY, HeaderValue::from_static("Origin"));
            }
            None if !self.credentials => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            }
            None => {}
        }

        if self.credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    fn preflight_headers(&self, req: &SecurityRequest, headers: &mut HeaderMap) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());

        match &self.allowed_headers {
            Some(allowed) => {
                headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed.clone());
            }
            None => {
                if let Some(requested) = req.headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
                    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
                    headers.append(
                        header::VARY,
                        HeaderValue::from_static("Access-Control-Request-Headers"),
                    );
                }
            }
        }

        if let Some(max_age) = &self.max_age {
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, max_age.clone());
        }
    }
}

fn joined(what: &str, values: &[String]) -> Result<Option<HeaderValue>> {
    if values.is_empty() {
        return Ok(None);
    }
    HeaderValue::from_str(&values.join(","))
        .map(Some)
        .map_err(|e| PipelineError::config(format!("Invalid CORS {}: {}", what, e)))
}
