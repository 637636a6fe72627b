//! Audit capture around the request lifecycle
//!
//! The HTTP adapter collects an [`AuditContext`] once the response is
//! final and hands it to [`AuditMiddleware::record`], which builds one
//! [`AuditEvent`] and writes it to the store. Store failures are logged and
//! counted, never returned.

use axum::http::{Method, StatusCode};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use super::classify::{classify_event, infer_resource, result_for, severity_for};
use super::log_event;
use super::models::{Actor, AuditEvent, AuditEventType, Resource};
use super::redact::{default_sensitive_fields, Redactor};
use super::store::AuditStore;
use crate::middleware::tree::DEFAULT_MAX_DEPTH;
use crate::middleware::Principal;
use crate::observability::MetricsCollector;

/// Audit capture options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub include_body: bool,

    #[serde(default = "default_true")]
    pub include_query: bool,

    /// Exact paths, or prefixes ending in `*`
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,

    #[serde(default = "default_sensitive_fields")]
    pub sensitive_fields: Vec<String>,

    /// Nesting limit for redaction; deeper values are recorded as `null`
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_true() -> bool { true }
fn default_max_depth() -> usize { DEFAULT_MAX_DEPTH }
fn default_exclude_paths() -> Vec<String> {
    vec!["/health".to_string(), "/metrics".to_string()]
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            include_body: false,
            include_query: true,
            exclude_paths: default_exclude_paths(),
            sensitive_fields: default_sensitive_fields(),
            max_depth: default_max_depth(),
        }
    }
}

/// Classification supplied by a handler through response extensions
#[derive(Debug, Clone, Default)]
pub struct AuditAnnotation {
    pub event_type: Option<AuditEventType>,
    pub action: Option<String>,
    pub resource: Option<Resource>,
    pub metadata: IndexMap<String, Value>,
    /// Suppress auditing for this response
    pub skip: bool,
}

impl AuditAnnotation {
    pub fn event_type(event_type: AuditEventType) -> Self {
        Self {
            event_type: Some(event_type),
            ..Default::default()
        }
    }

    pub fn skip() -> Self {
        Self {
            skip: true,
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Classification registered for a route pattern
#[derive(Debug, Clone, Default)]
pub struct RouteOverride {
    /// Restrict the override to one method
    pub method: Option<Method>,
    pub event_type: Option<AuditEventType>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
}

/// Request/response facts gathered by the HTTP adapter
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub duration: Duration,
    pub principal: Option<Principal>,
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
    pub query: Value,
    pub body: Value,
    pub annotation: Option<AuditAnnotation>,
}

impl AuditContext {
    pub fn new(method: Method, path: impl Into<String>, status: StatusCode) -> Self {
        Self {
            method,
            path: path.into(),
            status,
            duration: Duration::ZERO,
            principal: None,
            client_ip: None,
            user_agent: None,
            correlation_id: None,
            query: Value::Null,
            body: Value::Null,
            annotation: None,
        }
    }
}

/// Audit middleware
pub struct AuditMiddleware {
    store: Arc<dyn AuditStore>,
    options: AuditOptions,
    redactor: Redactor,
    overrides: Vec<(String, RouteOverride)>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AuditMiddleware {
    pub fn new(store: Arc<dyn AuditStore>, options: AuditOptions) -> Self {
        let redactor = Redactor::new(&options.sensitive_fields).with_max_depth(options.max_depth);
        Self {
            store,
            options,
            redactor,
            overrides: Vec::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a classification for paths matching `pattern`; the first
    /// registered match wins
    pub fn with_route_override(mut self, pattern: impl Into<String>, route: RouteOverride) -> Self {
        self.overrides.push((pattern.into(), route));
        self
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.options
            .exclude_paths
            .iter()
            .any(|pattern| path_matches(pattern, path))
    }

    /// Whether a request on `path` will be audited at all
    pub fn should_audit(&self, path: &str) -> bool {
        self.options.enabled && !self.is_excluded(path)
    }

    fn route_override(&self, method: &Method, path: &str) -> Option<&RouteOverride> {
        self.overrides
            .iter()
            .find(|(pattern, route)| {
                path_matches(pattern, path) && route.method.as_ref().map_or(true, |m| m == method)
            })
            .map(|(_, route)| route)
    }

    /// Build the event for a finished request
    pub fn build_event(&self, ctx: &AuditContext) -> AuditEvent {
        let annotation = ctx.annotation.as_ref();
        let route = self.route_override(&ctx.method, &ctx.path);

        let event_type = annotation
            .and_then(|a| a.event_type)
            .or_else(|| route.and_then(|r| r.event_type))
            .unwrap_or_else(|| classify_event(&ctx.method, &ctx.path, ctx.status));

        let action = annotation
            .and_then(|a| a.action.clone())
            .or_else(|| route.and_then(|r| r.action.clone()))
            .unwrap_or_else(|| format!("{} {}", ctx.method, ctx.path));

        let inferred = infer_resource(&ctx.path);
        let resource = annotation
            .and_then(|a| a.resource.clone())
            .or_else(|| {
                route.and_then(|r| r.resource_type.as_ref()).map(|resource_type| {
                    let resource = Resource::new(resource_type.clone());
                    match inferred.as_ref().and_then(|r| r.id.clone()) {
                        Some(id) => resource.with_id(id),
                        None => resource,
                    }
                })
            })
            .or(inferred);

        let actor = match &ctx.principal {
            Some(principal) => Actor {
                id: Some(principal.id.clone()),
                kind: principal.kind,
                identifier: principal.identifier.clone(),
                roles: (!principal.roles.is_empty()).then(|| principal.roles.clone()),
            },
            None => Actor::anonymous(
                ctx.client_ip
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
        };

        let mut builder = AuditEvent::builder(event_type, action)
            .severity(severity_for(ctx.status))
            .result(result_for(ctx.status))
            .actor(actor)
            .metadata("method", ctx.method.as_str())
            .metadata("path", ctx.path.as_str())
            .metadata("statusCode", ctx.status.as_u16())
            .metadata("durationMs", ctx.duration.as_micros() as f64 / 1000.0);

        if let Some(resource) = resource {
            builder = builder.resource(resource);
        }
        if self.options.include_query && !is_blank(&ctx.query) {
            builder = builder.metadata("query", self.redactor.redact(&ctx.query));
        }
        if self.options.include_body && !is_blank(&ctx.body) {
            builder = builder.metadata("body", self.redactor.redact(&ctx.body));
        }
        if let Some(annotation) = annotation {
            let extra: serde_json::Map<String, Value> = annotation.metadata.clone().into_iter().collect();
            if let Value::Object(redacted) = self.redactor.redact(&Value::Object(extra)) {
                for (key, value) in redacted {
                    builder = builder.metadata(key, value);
                }
            }
        }
        if let Some(ip) = ctx.client_ip {
            builder = builder.source_ip(ip.to_string());
        }
        if let Some(user_agent) = &ctx.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(correlation_id) = &ctx.correlation_id {
            builder = builder.correlation_id(correlation_id.clone());
        }

        builder.build()
    }

    /// Build and save the event for `ctx`; returns whether an event was written
    pub async fn record(&self, ctx: AuditContext) -> bool {
        if !self.should_audit(&ctx.path) || ctx.annotation.as_ref().is_some_and(|a| a.skip) {
            return false;
        }

        let event = self.build_event(&ctx);
        let event_id = event.id;
        log_event(&event);

        match self.store.save(event).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_audit_saved();
                }
                true
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "Failed to save audit event");
                if let Some(metrics) = &self.metrics {
                    metrics.record_audit_failed();
                }
                false
            }
        }
    }
}

fn path_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
