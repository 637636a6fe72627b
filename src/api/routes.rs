//! API route configuration

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::{
    audit::{AuditEvent, AuditQueryFilters, AuditStore, IntegrityReport},
    middleware::Rejection,
    pipeline::Pipeline,
};

/// Query-string form of [`AuditQueryFilters`]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub actor_id: Option<String>,
    pub event_type: Option<String>,
    pub severity: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub result: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl AuditQueryParams {
    /// Parse into filters; the error names the offending parameter
    pub fn into_filters(self) -> Result<AuditQueryFilters, String> {
        Ok(AuditQueryFilters {
            from: self.from.as_deref().map(|v| parse_timestamp("from", v)).transpose()?,
            to: self.to.as_deref().map(|v| parse_timestamp("to", v)).transpose()?,
            actor_id: self.actor_id,
            event_type: self
                .event_type
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|e| format!("eventType: {}", e))?,
            severity: self
                .severity
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|e| format!("severity: {}", e))?,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            result: self
                .result
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(|e| format!("result: {}", e))?,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

fn parse_timestamp(name: &str, value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("{}: {}", name, e))
}

/// Page of audit events
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryResponse {
    pub events: Vec<AuditEvent>,
    pub count: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Admin routes over an audit store
///
/// Mount behind the caller's own authorization; these routes do not check
/// credentials.
pub fn audit_routes(store: Arc<dyn AuditStore>) -> Router {
    Router::new()
        .route("/admin/audit", get(query_audit_handler))
        .route("/admin/audit/verify", get(verify_audit_handler))
        .with_state(store)
}

/// Liveness and Prometheus metrics for a pipeline
pub fn health_routes(pipeline: Pipeline) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(pipeline)
}

/// Root handler
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "security-pipeline",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check handler
async fn health_handler(State(pipeline): State<Pipeline>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "stages": pipeline.chain().stage_names(),
            "auditEnabled": pipeline.config().audit_enabled,
        })),
    )
}

/// Metrics handler
async fn metrics_handler(State(pipeline): State<Pipeline>) -> impl IntoResponse {
    let mut output = pipeline.metrics().export_prometheus();

    if let Some(limiter) = pipeline.chain().rate_limiter() {
        let stats = limiter.stats();
        output.push_str("# HELP security_pipeline_rate_limit_tracked_keys Buckets currently held\n");
        output.push_str("# TYPE security_pipeline_rate_limit_tracked_keys gauge\n");
        output.push_str(&format!(
            "security_pipeline_rate_limit_tracked_keys {}\n",
            stats.tracked_keys
        ));
    }

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], output)
}

async fn query_audit_handler(
    State(store): State<Arc<dyn AuditStore>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditQueryResponse>, Rejection> {
    let filters = params.into_filters().map_err(|message| {
        Rejection::custom(StatusCode::BAD_REQUEST, "INVALID_AUDIT_FILTER", message)
    })?;

    let events = store.query(&filters).await.map_err(|e| {
        error!(error = %e, "Audit query failed");
        Rejection::custom(StatusCode::INTERNAL_SERVER_ERROR, "AUDIT_QUERY_FAILED", "Audit query failed")
    })?;

    Ok(Json(AuditQueryResponse {
        count: events.len(),
        limit: filters.effective_limit(),
        offset: filters.effective_offset(),
        events,
    }))
}

async fn verify_audit_handler(
    State(store): State<Arc<dyn AuditStore>>,
) -> Result<Json<IntegrityReport>, Rejection> {
    match store.verify_integrity().await {
        Ok(Some(report)) => Ok(Json(report)),
        Ok(None) => Err(Rejection::custom(
            StatusCode::NOT_IMPLEMENTED,
            "AUDIT_VERIFY_UNSUPPORTED",
            "This audit store does not support integrity checks",
        )),
        Err(e) => {
            error!(error = %e, "Audit integrity check failed");
            Err(Rejection::custom(
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUDIT_VERIFY_FAILED",
                "Audit integrity check failed",
            ))
        }
    }
}
