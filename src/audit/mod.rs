//! Audit trail: event model, redaction, storage and request capture

pub mod classify;
pub mod middleware;
pub mod models;
pub mod redact;
pub mod store;

pub use classify::{classify_event, infer_resource, result_for, severity_for};
pub use middleware::{AuditAnnotation, AuditContext, AuditMiddleware, AuditOptions, RouteOverride};
pub use models::{
    Actor, ActorKind, AuditEvent, AuditEventBuilder, AuditEventType, AuditQueryFilters, AuditResult,
    Resource, Severity, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT,
};
pub use redact::{default_sensitive_fields, Redactor, REDACTION_MARKER};
pub use store::{AuditStore, ChainedRecord, InMemoryAuditStore, IntegrityReport, GENESIS_HASH};

/// Emit `event` on the `audit` target at a level matching its severity
pub(crate) fn log_event(event: &AuditEvent) {
    macro_rules! emit {
        ($level:ident) => {
            tracing::$level!(
                target: "audit",
                event_id = %event.id,
                event_type = %event.event_type,
                actor = %event.actor.identifier,
                action = %event.action,
                result = ?event.result,
                "Audit event"
            )
        };
    }

    match event.severity {
        Severity::Info => emit!(info),
        Severity::Warning => emit!(warn),
        Severity::Error | Severity::Critical => emit!(error),
    }
}
