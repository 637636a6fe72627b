//! Request body guard: size limit, content-type allow-list and decoding
//!
//! Bodies are buffered chunk by chunk and abandoned as soon as they cross
//! the limit, so a missing or lying `Content-Length` cannot force an
//! unbounded read.

use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::request::{query_to_value, value_to_query};
use crate::error::{PipelineError, Result};

/// Configuration for the body guard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyLimitConfig {
    /// Maximum body size in bytes (0 = unlimited)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Media types accepted for non-empty bodies
    #[serde(default = "default_content_types")]
    pub allowed_content_types: Vec<String>,
}

fn default_max_body_size() -> usize { 1024 * 1024 }
fn default_content_types() -> Vec<String> {
    vec![
        "application/json".to_string(),
        "application/x-www-form-urlencoded".to_string(),
    ]
}

impl Default for BodyLimitConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            allowed_content_types: default_content_types(),
        }
    }
}

/// How a body was decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Json,
    Form,
    /// Allowed media type that is passed through undecoded
    Opaque,
}

/// Buffered body plus its decoded value tree
#[derive(Debug, Clone)]
pub struct DecodedBody {
    pub bytes: Bytes,
    pub tree: Value,
    pub kind: BodyKind,
}

impl DecodedBody {
    pub fn empty() -> Self {
        Self {
            bytes: Bytes::new(),
            tree: Value::Null,
            kind: BodyKind::Empty,
        }
    }

    /// Serialize a rewritten tree back into the body's original encoding
    pub fn encode(&self, tree: &Value) -> std::result::Result<Bytes, BodyGuardError> {
        match self.kind {
            BodyKind::Json => serde_json::to_vec(tree)
                .map(Bytes::from)
                .map_err(|e| BodyGuardError::Malformed(e.to_string())),
            BodyKind::Form => Ok(Bytes::from(value_to_query(tree))),
            BodyKind::Empty | BodyKind::Opaque => Ok(self.bytes.clone()),
        }
    }
}

/// Body guard error
#[derive(Debug, Clone, thiserror::Error)]
pub enum BodyGuardError {
    #[error("Request body exceeds the {limit} byte limit")]
    TooLarge { limit: usize },

    #[error("Unsupported content type: {0}")]
    UnsupportedMediaType(String),

    #[error("Malformed request body: {0}")]
    Malformed(String),

    #[error("Failed to read request body: {0}")]
    Read(String),
}

/// Body guard
#[derive(Debug, Clone)]
pub struct BodyGuard {
    config: BodyLimitConfig,
    allowed: Vec<String>,
}

impl BodyGuard {
    /// Create a new body guard
    pub fn new(config: BodyLimitConfig) -> Result<Self> {
        if config.allowed_content_types.is_empty() {
            return Err(PipelineError::config(
                "At least one allowed content type is required",
            ));
        }
        let allowed = config
            .allowed_content_types
            .iter()
            .map(|ct| essence(ct))
            .collect();
        Ok(Self { config, allowed })
    }

    /// Get the maximum body size in bytes
    pub fn max_body_size(&self) -> usize {
        self.config.max_body_size
    }

    /// Reject early on a declared `Content-Length` above the limit
    pub fn check_declared_length(&self, headers: &HeaderMap) -> std::result::Result<(), BodyGuardError> {
        if self.config.max_body_size == 0 {
            return Ok(());
        }
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());

        match declared {
            Some(len) if len > self.config.max_body_size => {
                warn!(
                    "Request body too large: {} bytes (max: {})",
                    len, self.config.max_body_size
                );
                Err(BodyGuardError::TooLarge {
                    limit: self.config.max_body_size,
                })
            }
            _ => Ok(()),
        }
    }

    /// Buffer and decode a request body
    pub async fn read(&self, headers: &HeaderMap, body: Body) -> std::result::Result<DecodedBody, BodyGuardError> {
        self.check_declared_length(headers)?;

        let limit = self.config.max_body_size;
        let mut stream = body.into_data_stream();
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BodyGuardError::Read(e.to_string()))?;
            if limit > 0 && buf.len() + chunk.len() > limit {
                warn!("Request body exceeded {} bytes while streaming", limit);
                return Err(BodyGuardError::TooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }

        self.decode(headers, buf.freeze())
    }

    /// Decode an already buffered body according to its content type
    pub fn decode(&self, headers: &HeaderMap, bytes: Bytes) -> std::result::Result<DecodedBody, BodyGuardError> {
        if bytes.is_empty() {
            return Ok(DecodedBody::empty());
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(essence)
            .unwrap_or_default();

        if !self.allowed.iter().any(|allowed| allowed == &content_type) {
            let shown = if content_type.is_empty() {
                "<none>".to_string()
            } else {
                content_type
            };
            warn!(content_type = %shown, "Rejected request body media type");
            return Err(BodyGuardError::UnsupportedMediaType(shown));
        }

        if content_type == "application/json" || content_type.ends_with("+json") {
            let tree = serde_json::from_slice(&bytes)
                .map_err(|e| BodyGuardError::Malformed(e.to_string()))?;
            Ok(DecodedBody { bytes, tree, kind: BodyKind::Json })
        } else if content_type == "application/x-www-form-urlencoded" {
            let text = std::str::from_utf8(&bytes)
                .map_err(|e| BodyGuardError::Malformed(e.to_string()))?;
            let tree = query_to_value(text);
            Ok(DecodedBody { bytes, tree, kind: BodyKind::Form })
        } else {
            Ok(DecodedBody { bytes, tree: Value::Null, kind: BodyKind::Opaque })
        }
    }
}

/// Media type without parameters, lowercased: `Application/JSON; charset=utf-8` -> `application/json`
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
