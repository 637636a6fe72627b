//! Configuration management for the security pipeline

use serde::{Deserialize, Serialize};
use std::path::Path;
use secrecy::{Secret, ExposeSecret};

use crate::audit::{default_sensitive_fields, AuditOptions};
use crate::middleware::{
    BodyLimitConfig, CorsConfig, HeaderHardeningConfig, InjectionGuardConfig, OriginPolicy,
    RateLimitConfig, SanitizerOptions,
};

pub mod loader;
pub mod validation;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Server host
    #[serde(default = "default_server_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            host: default_server_host(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Every recognized pipeline option
///
/// Each `*_enabled` flag adds or removes a whole stage. Options that cannot
/// be expressed as data (key functions, origin predicates, audit backends)
/// are supplied through [`crate::pipeline::PipelineBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Header hardening stage
    #[serde(default = "default_true")]
    pub helmet_enabled: bool,

    #[serde(default)]
    pub helmet: HeaderHardeningConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// HTML-escape strings during sanitization
    #[serde(default = "default_true")]
    pub xss_enabled: bool,

    #[serde(default = "default_true")]
    pub no_sql_injection_guard_enabled: bool,

    #[serde(default = "default_true")]
    pub hpp_enabled: bool,

    /// Query parameters allowed to repeat
    #[serde(default)]
    pub hpp_whitelist: Vec<String>,

    /// NUL/control stripping and trimming
    #[serde(default = "default_true")]
    pub sanitization_enabled: bool,

    /// Allowed origins; `["*"]` allows any origin, empty disables CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub cors_credentials: bool,

    #[serde(default = "default_cors_methods")]
    pub cors_methods: Vec<String>,

    /// Empty mirrors `Access-Control-Request-Headers`
    #[serde(default)]
    pub cors_allowed_headers: Vec<String>,

    #[serde(default)]
    pub cors_exposed_headers: Vec<String>,

    #[serde(default = "default_cors_max_age")]
    pub cors_max_age_secs: Option<u64>,

    /// Treat requests without an `Origin` header as denied
    #[serde(default)]
    pub cors_reject_missing_origin: bool,

    #[serde(default = "default_true")]
    pub audit_enabled: bool,

    #[serde(default)]
    pub audit_include_body: bool,

    #[serde(default = "default_true")]
    pub audit_include_query: bool,

    /// Exact paths, or prefixes ending in `*`
    #[serde(default = "default_audit_exclude_paths")]
    pub audit_exclude_paths: Vec<String>,

    #[serde(default = "default_sensitive_fields")]
    pub audit_sensitive_fields: Vec<String>,

    /// In-memory ring buffer size
    #[serde(default = "default_audit_max_events")]
    pub audit_max_events: usize,

    /// HMAC key for the audit hash chain (secured)
    #[serde(default, serialize_with = "serialize_optional_secret", deserialize_with = "deserialize_optional_secret")]
    pub audit_chain_key: Option<Secret<String>>,

    /// Maximum request body size in bytes (0 = unlimited)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,

    /// Nesting limit for tree traversal
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

// Default value functions
fn default_true() -> bool { true }
fn default_cors_origins() -> Vec<String> { vec!["*".to_string()] }
fn default_cors_methods() -> Vec<String> { CorsConfig::default().methods }
fn default_cors_max_age() -> Option<u64> { Some(600) }
fn default_audit_exclude_paths() -> Vec<String> { AuditOptions::default().exclude_paths }
fn default_audit_max_events() -> usize { crate::audit::store::DEFAULT_MAX_EVENTS }
fn default_max_body_bytes() -> usize { 1024 * 1024 } // 1 MiB
fn default_allowed_content_types() -> Vec<String> { BodyLimitConfig::default().allowed_content_types }
fn default_max_depth() -> usize { crate::middleware::tree::DEFAULT_MAX_DEPTH }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_server_port() -> u16 { 8080 }
fn default_server_host() -> String { "0.0.0.0".to_string() }

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl SecurityConfig {
    /// Every stage enabled
    pub fn production() -> Self {
        Self {
            helmet_enabled: true,
            helmet: HeaderHardeningConfig::default(),
            rate_limit: RateLimitConfig::default(),
            xss_enabled: true,
            no_sql_injection_guard_enabled: true,
            hpp_enabled: true,
            hpp_whitelist: Vec::new(),
            sanitization_enabled: true,
            cors_origins: default_cors_origins(),
            cors_credentials: false,
            cors_methods: default_cors_methods(),
            cors_allowed_headers: Vec::new(),
            cors_exposed_headers: Vec::new(),
            cors_max_age_secs: default_cors_max_age(),
            cors_reject_missing_origin: false,
            audit_enabled: true,
            audit_include_body: false,
            audit_include_query: true,
            audit_exclude_paths: default_audit_exclude_paths(),
            audit_sensitive_fields: default_sensitive_fields(),
            audit_max_events: default_audit_max_events(),
            audit_chain_key: None,
            max_body_bytes: default_max_body_bytes(),
            allowed_content_types: default_allowed_content_types(),
            max_depth: default_max_depth(),
        }
    }

    /// CORS and sanitization only
    pub fn development() -> Self {
        let mut config = Self::production();
        config.helmet_enabled = false;
        config.no_sql_injection_guard_enabled = false;
        config.hpp_enabled = false;
        config.rate_limit.enabled = false;
        config
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validation::validate_security_config(self)
    }

    pub fn cors_enabled(&self) -> bool {
        !self.cors_origins.is_empty()
    }

    /// Whether the sanitize stage is part of the chain
    pub fn sanitize_stage_enabled(&self) -> bool {
        self.sanitization_enabled || self.xss_enabled
    }

    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::from_origins(&self.cors_origins)
    }

    pub fn cors_config(&self) -> CorsConfig {
        CorsConfig {
            credentials: self.cors_credentials,
            methods: self.cors_methods.clone(),
            allowed_headers: self.cors_allowed_headers.clone(),
            exposed_headers: self.cors_exposed_headers.clone(),
            max_age_secs: self.cors_max_age_secs,
            reject_missing_origin: self.cors_reject_missing_origin,
        }
    }

    pub fn sanitizer_options(&self) -> SanitizerOptions {
        SanitizerOptions {
            escape_html: self.xss_enabled,
            strip_control: self.sanitization_enabled,
            trim: self.sanitization_enabled,
            max_depth: self.max_depth,
        }
    }

    pub fn injection_config(&self) -> InjectionGuardConfig {
        InjectionGuardConfig {
            max_depth: self.max_depth,
            ..Default::default()
        }
    }

    pub fn body_limit_config(&self) -> BodyLimitConfig {
        BodyLimitConfig {
            max_body_size: self.max_body_bytes,
            allowed_content_types: self.allowed_content_types.clone(),
        }
    }

    pub fn audit_options(&self) -> AuditOptions {
        AuditOptions {
            enabled: self.audit_enabled,
            include_body: self.audit_include_body,
            include_query: self.audit_include_query,
            exclude_paths: self.audit_exclude_paths.clone(),
            sensitive_fields: self.audit_sensitive_fields.clone(),
            max_depth: self.max_depth,
        }
    }

    /// Audit chain key, if one is configured and non-empty
    pub fn chain_key(&self) -> Option<Secret<String>> {
        self.audit_chain_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
            .map(|key| Secret::new(key.expose_secret().clone()))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let config = loader::load_config_with_env(path)?;
        validation::validate_config(&config)?;
        Ok(config)
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validation::validate_config(self)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            security: SecurityConfig::production(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Custom serializer for Option<Secret<String>>
fn serialize_optional_secret<S>(secret: &Option<Secret<String>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Custom deserializer for Option<Secret<String>>
fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<Secret<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.map(Secret::new))
}
