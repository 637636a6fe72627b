//! Security Pipeline - request hardening and audit logging for axum services
//!
//! Every inbound request passes through a fixed sequence of stages before it
//! reaches application code, and every finished request leaves an audit
//! event behind.
//!
//! ## Features
//!
//! - **CORS**: allow-all, allow-list or (async) predicate origin policies
//! - **Header Hardening**: CSP, HSTS, frame options and friends
//! - **Injection Defense**: operator-prefixed keys (`$gt`) are neutralized
//! - **Parameter Pollution**: repeated query parameters collapse to one value
//! - **Rate Limiting**: per-key token buckets with actor-class quotas
//! - **Sanitization**: NUL/control stripping, HTML escaping, trimming
//! - **Audit Trail**: redacted, hash-chained events with a query API
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use security_pipeline::prelude::*;
//! use axum::{routing::get, Router};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pipeline = Pipeline::builder(SecurityConfig::production())
//!         .origin_policy(OriginPolicy::allow_list(["https://app.example.com"]))
//!         .build()?;
//!
//!     let app = pipeline
//!         .attach(Router::new().route("/items", get(|| async { "ok" })))
//!         .merge(security_pipeline::api::audit_routes(pipeline.audit_store()));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await
//!         .map_err(|e| PipelineError::Internal(e.to_string()))?;
//!     axum::serve(listener, app).await
//!         .map_err(|e| PipelineError::Internal(e.to_string()))?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod shutdown;

pub use config::{AppConfig, SecurityConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineBuilder};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audit::{
        AuditAnnotation, AuditEvent, AuditEventType, AuditQueryFilters, AuditStore,
        InMemoryAuditStore, Severity,
    };
    pub use crate::config::{AppConfig, SecurityConfig};
    pub use crate::error::{PipelineError, Result};
    pub use crate::middleware::{
        OriginPolicy, Principal, RateLimitConfig, RateLimitKey, RateLimiter, Rejection,
        SanitizedInput, Sanitizer, SecurityChain, SecurityRequest, Verdict,
    };
    pub use crate::observability::MetricsCollector;
    pub use crate::pipeline::{Pipeline, PipelineBuilder};
    pub use crate::shutdown::{ShutdownCoordinator, ShutdownNotifier};
}
