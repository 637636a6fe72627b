//! HTTP routes served alongside the pipeline

pub mod routes;

pub use routes::{audit_routes, health_routes, AuditQueryParams, AuditQueryResponse};
