//! Error types for the security pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Main error type for the security pipeline
///
/// Request-time rejections (denied origin, rate limit, oversized payload)
/// are not errors; they travel as [`crate::middleware::Rejection`] values.
/// This type covers construction-time misconfiguration and collaborator
/// failures only.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Rate limit error: {0}")]
    RateLimit(#[from] crate::middleware::RateLimitError),

    #[error("Body guard error: {0}")]
    BodyGuard(#[from] crate::middleware::BodyGuardError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by audit storage backends
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Audit write rejected: {0}")]
    WriteRejected(String),

    #[error("Audit query failed: {0}")]
    QueryFailed(String),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid audit chain key: {0}")]
    InvalidKey(String),
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl PipelineError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        PipelineError::Config(msg.into())
    }
}
