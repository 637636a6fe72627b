//! Audit domain model

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Default page size for audit queries
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Hard cap on a single page
pub const MAX_QUERY_LIMIT: usize = 1000;

/// Kind of audited activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailure,
    Logout,
    DataRead,
    DataCreated,
    DataUpdated,
    DataDeleted,
    AccessDenied,
    RateLimitExceeded,
    SecurityViolation,
    ApiRequest,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::LoginSuccess => "login_success",
            AuditEventType::LoginFailure => "login_failure",
            AuditEventType::Logout => "logout",
            AuditEventType::DataRead => "data_read",
            AuditEventType::DataCreated => "data_created",
            AuditEventType::DataUpdated => "data_updated",
            AuditEventType::DataDeleted => "data_deleted",
            AuditEventType::AccessDenied => "access_denied",
            AuditEventType::RateLimitExceeded => "rate_limit_exceeded",
            AuditEventType::SecurityViolation => "security_violation",
            AuditEventType::ApiRequest => "api_request",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("Unknown audit event type: {}", s))
    }
}

/// Event severity; ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

/// Kind of actor behind a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    Service,
    System,
    Anonymous,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::User => "user",
            ActorKind::Service => "service",
            ActorKind::System => "system",
            ActorKind::Anonymous => "anonymous",
        }
    }
}

/// Who performed the action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: ActorKind,
    /// Username, service name, or client address for anonymous callers
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

impl Actor {
    pub fn anonymous(identifier: impl Into<String>) -> Self {
        Self {
            id: None,
            kind: ActorKind::Anonymous,
            identifier: identifier.into(),
            roles: None,
        }
    }

    pub fn system() -> Self {
        Self {
            id: None,
            kind: ActorKind::System,
            identifier: "system".to_string(),
            roles: None,
        }
    }
}

/// What was acted upon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<IndexMap<String, Value>>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            name: None,
            attributes: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

impl std::str::FromStr for AuditResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "success" => Ok(AuditResult::Success),
            "failure" => Ok(AuditResult::Failure),
            other => Err(format!("Unknown audit result: {}", other)),
        }
    }
}

/// Immutable record of one audited request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    pub action: String,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditEvent {
    pub fn builder(event_type: AuditEventType, action: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type, action)
    }
}

/// Builder for [`AuditEvent`]
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    timestamp: Option<DateTime<Utc>>,
    event_type: AuditEventType,
    severity: Severity,
    actor: Actor,
    resource: Option<Resource>,
    action: String,
    result: AuditResult,
    metadata: IndexMap<String, Value>,
    source_ip: Option<String>,
    user_agent: Option<String>,
    correlation_id: Option<String>,
}

impl AuditEventBuilder {
    pub fn new(event_type: AuditEventType, action: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            event_type,
            severity: Severity::Info,
            actor: Actor::anonymous("unknown"),
            resource: None,
            action: action.into(),
            result: AuditResult::Success,
            metadata: IndexMap::new(),
            source_ip: None,
            user_agent: None,
            correlation_id: None,
        }
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn result(mut self, result: AuditResult) -> Self {
        self.result = result;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            event_type: self.event_type,
            severity: self.severity,
            actor: self.actor,
            resource: self.resource,
            action: self.action,
            result: self.result,
            metadata: if self.metadata.is_empty() {
                None
            } else {
                Some(self.metadata)
            },
            source_ip: self.source_ip,
            user_agent: self.user_agent,
            correlation_id: self.correlation_id,
        }
    }
}

/// Conjunctive audit query; absent fields impose no restriction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQueryFilters {
    /// Inclusive lower bound
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<AuditEventType>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub result: Option<AuditResult>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl AuditQueryFilters {
    /// Page size after applying the default and the cap
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Whether `event` satisfies every present predicate
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if self.from.is_some_and(|from| event.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.timestamp > to) {
            return false;
        }
        if let Some(actor_id) = &self.actor_id {
            if event.actor.id.as_deref() != Some(actor_id.as_str()) {
                return false;
            }
        }
        if self.event_type.is_some_and(|t| event.event_type != t) {
            return false;
        }
        if self.severity.is_some_and(|s| event.severity != s) {
            return false;
        }
        if self.result.is_some_and(|r| event.result != r) {
            return false;
        }
        if let Some(resource_type) = &self.resource_type {
            if event.resource.as_ref().map(|r| &r.resource_type) != Some(resource_type) {
                return false;
            }
        }
        if let Some(resource_id) = &self.resource_id {
            if event.resource.as_ref().and_then(|r| r.id.as_ref()) != Some(resource_id) {
                return false;
            }
        }
        true
    }
}
