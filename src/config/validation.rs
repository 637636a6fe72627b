//! Configuration validation

use super::*;
use crate::error::{PipelineError, Result};
use crate::middleware::rate_limiter::{MAX_IDLE_EVICTION_FACTOR, MAX_WINDOW_SECONDS};
use axum::http::{HeaderName, Method};

/// Validate complete configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_logging_config(&config.logging)?;
    validate_security_config(&config.security)?;
    Ok(())
}

/// Validate server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.port == 0 {
        return Err(PipelineError::Config(
            "Server port cannot be 0".to_string()
        ));
    }

    if config.host.is_empty() {
        return Err(PipelineError::Config(
            "Server host cannot be empty".to_string()
        ));
    }

    Ok(())
}

fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    match config.format.as_str() {
        "json" | "compact" | "pretty" => Ok(()),
        other => Err(PipelineError::Config(format!(
            "Unknown log format '{}' (expected json, compact or pretty)",
            other
        ))),
    }
}

/// Validate the security pipeline options
pub fn validate_security_config(config: &SecurityConfig) -> Result<()> {
    validate_rate_limit_config(&config.rate_limit)?;
    validate_cors_config(config)?;

    if config.max_depth == 0 {
        return Err(PipelineError::Config(
            "max_depth must be greater than 0".to_string()
        ));
    }

    if config.allowed_content_types.is_empty() {
        return Err(PipelineError::Config(
            "allowed_content_types cannot be empty".to_string()
        ));
    }

    if config.audit_enabled && config.audit_max_events == 0 {
        return Err(PipelineError::Config(
            "audit_max_events must be greater than 0 when auditing is enabled".to_string()
        ));
    }

    if config.audit_sensitive_fields.iter().any(|f| f.trim().is_empty()) {
        return Err(PipelineError::Config(
            "audit_sensitive_fields cannot contain empty entries".to_string()
        ));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    if config.max_requests == 0 {
        return Err(PipelineError::Config(
            "Rate limit max_requests must be greater than 0".to_string()
        ));
    }

    if config.window_seconds == 0 || config.window_seconds > MAX_WINDOW_SECONDS {
        return Err(PipelineError::Config(format!(
            "Rate limit window_seconds must be between 1 and {}",
            MAX_WINDOW_SECONDS
        )));
    }

    for (class, quota) in &config.class_quotas {
        if quota.max_requests == 0 || quota.window_seconds == 0 || quota.window_seconds > MAX_WINDOW_SECONDS {
            return Err(PipelineError::Config(format!(
                "Rate limit quota for class '{}' must have positive max_requests and a window between 1 and {} seconds",
                class, MAX_WINDOW_SECONDS
            )));
        }
    }

    if config.idle_eviction_factor == 0 || config.idle_eviction_factor > MAX_IDLE_EVICTION_FACTOR {
        return Err(PipelineError::Config(format!(
            "Rate limit idle_eviction_factor must be between 1 and {}",
            MAX_IDLE_EVICTION_FACTOR
        )));
    }

    if config.sweep_interval_secs > MAX_WINDOW_SECONDS {
        return Err(PipelineError::Config(format!(
            "Rate limit sweep_interval_secs must be at most {}",
            MAX_WINDOW_SECONDS
        )));
    }

    Ok(())
}

fn validate_cors_config(config: &SecurityConfig) -> Result<()> {
    for origin in config.cors_origins.iter().filter(|o| o.as_str() != "*") {
        let parsed = url::Url::parse(origin)
            .map_err(|e| PipelineError::Config(format!("Invalid CORS origin '{}': {}", origin, e)))?;
        if parsed.path() != "/" || parsed.query().is_some() {
            return Err(PipelineError::Config(format!(
                "CORS origin '{}' must be scheme://host[:port] only",
                origin
            )));
        }
    }

    for method in &config.cors_methods {
        Method::from_bytes(method.as_bytes())
            .map_err(|_| PipelineError::Config(format!("Invalid CORS method '{}'", method)))?;
    }

    for header in config.cors_allowed_headers.iter().chain(&config.cors_exposed_headers) {
        HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| PipelineError::Config(format!("Invalid CORS header name '{}'", header)))?;
    }

    Ok(())
}
