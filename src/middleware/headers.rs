//! Security response header hardening
//!
//! Sets a fixed set of defensive response headers on every admitted (and
//! rejected) response. Header values are validated once at construction.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PipelineError, Result};

/// Headers stripped from responses because they fingerprint the stack
pub const REMOVED_HEADERS: &[&str] = &["x-powered-by", "server"];

/// HSTS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HstsConfig {
    #[serde(default = "default_hsts_max_age")]
    pub max_age: u64,
    #[serde(default = "default_true")]
    pub include_subdomains: bool,
    #[serde(default)]
    pub preload: bool,
}

fn default_hsts_max_age() -> u64 { 15_552_000 }
fn default_true() -> bool { true }

impl Default for HstsConfig {
    fn default() -> Self {
        Self {
            max_age: default_hsts_max_age(),
            include_subdomains: true,
            preload: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum FrameOptions {
    #[serde(rename = "DENY")]
    Deny,
    #[default]
    #[serde(rename = "SAMEORIGIN")]
    SameOrigin,
}

impl FrameOptions {
    fn as_str(&self) -> &'static str {
        match self {
            FrameOptions::Deny => "DENY",
            FrameOptions::SameOrigin => "SAMEORIGIN",
        }
    }
}

/// Header hardening configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderHardeningConfig {
    #[serde(default = "default_csp")]
    pub content_security_policy: Option<String>,

    #[serde(default = "default_hsts")]
    pub hsts: Option<HstsConfig>,

    #[serde(default)]
    pub frame_options: FrameOptions,

    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,

    /// Extra headers applied after the built-in set
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

fn default_csp() -> Option<String> {
    Some(
        "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
         form-action 'self';frame-ancestors 'self';img-src 'self' data:;\
         object-src 'none';script-src 'self';script-src-attr 'none';\
         style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests"
            .to_string(),
    )
}
fn default_hsts() -> Option<HstsConfig> { Some(HstsConfig::default()) }
fn default_referrer_policy() -> String { "no-referrer".to_string() }

impl Default for HeaderHardeningConfig {
    fn default() -> Self {
        Self {
            content_security_policy: default_csp(),
            hsts: default_hsts(),
            frame_options: FrameOptions::default(),
            referrer_policy: default_referrer_policy(),
            custom_headers: HashMap::new(),
        }
    }
}

/// Precomputed hardening header set
#[derive(Debug, Clone)]
pub struct HeaderHardening {
    headers: HeaderMap,
}

impl HeaderHardening {
    /// Build the header set, rejecting values that are not valid header text
    pub fn new(config: HeaderHardeningConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();

        if let Some(csp) = &config.content_security_policy {
            headers.insert(
                HeaderName::from_static("content-security-policy"),
                header_value("Content-Security-Policy", csp)?,
            );
        }

        headers.insert(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        );
        headers.insert(
            HeaderName::from_static("cross-origin-resource-policy"),
            HeaderValue::from_static("same-origin"),
        );
        headers.insert(
            HeaderName::from_static("origin-agent-cluster"),
            HeaderValue::from_static("?1"),
        );
        headers.insert(
            HeaderName::from_static("referrer-policy"),
            header_value("Referrer-Policy", &config.referrer_policy)?,
        );

        if let Some(hsts) = &config.hsts {
            let mut value = format!("max-age={}", hsts.max_age);
            if hsts.include_subdomains {
                value.push_str("; includeSubDomains");
            }
            if hsts.preload {
                value.push_str("; preload");
            }
            headers.insert(
                HeaderName::from_static("strict-transport-security"),
                header_value("Strict-Transport-Security", &value)?,
            );
        }

        headers.insert(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        );
        headers.insert(
            HeaderName::from_static("x-dns-prefetch-control"),
            HeaderValue::from_static("off"),
        );
        headers.insert(
            HeaderName::from_static("x-download-options"),
            HeaderValue::from_static("noopen"),
        );
        headers.insert(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static(config.frame_options.as_str()),
        );
        headers.insert(
            HeaderName::from_static("x-permitted-cross-domain-policies"),
            HeaderValue::from_static("none"),
        );
        // Legacy auditors do more harm than good; turn them off explicitly.
        headers.insert(
            HeaderName::from_static("x-xss-protection"),
            HeaderValue::from_static("0"),
        );

        for (name, value) in &config.custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                PipelineError::config(format!("Invalid custom header name '{}': {}", name, e))
            })?;
            headers.insert(name.clone(), header_value(name.as_str(), value)?);
        }

        Ok(Self { headers })
    }

    /// Hardening headers to set on the response
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Overwrite the hardening headers on `target`
    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| PipelineError::config(format!("Invalid {} header value: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let hardening = HeaderHardening::new(HeaderHardeningConfig::default()).unwrap();
        let mut headers = HeaderMap::new();
        hardening.apply(&mut headers);

        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "SAMEORIGIN");
        assert_eq!(headers["x-xss-protection"], "0");
        assert_eq!(headers["referrer-policy"], "no-referrer");
        assert_eq!(
            headers["strict-transport-security"],
            "max-age=15552000; includeSubDomains"
        );
        assert!(headers.contains_key("content-security-policy"));
    }

    #[test]
    fn test_optional_headers_can_be_disabled() {
        let config = HeaderHardeningConfig {
            content_security_policy: None,
            hsts: None,
            frame_options: FrameOptions::Deny,
            ..Default::default()
        };
        let hardening = HeaderHardening::new(config).unwrap();

        assert!(!hardening.headers().contains_key("content-security-policy"));
        assert!(!hardening.headers().contains_key("strict-transport-security"));
        assert_eq!(hardening.headers()["x-frame-options"], "DENY");
    }

    #[test]
    fn test_invalid_values_fail_construction() {
        let bad_value = HeaderHardeningConfig {
            referrer_policy: "no-referrer\n".to_string(),
            ..Default::default()
        };
        assert!(HeaderHardening::new(bad_value).is_err());

        let mut bad_name = HeaderHardeningConfig::default();
        bad_name
            .custom_headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(HeaderHardening::new(bad_name).is_err());
    }

    #[test]
    fn test_custom_headers_applied() {
        let mut config = HeaderHardeningConfig::default();
        config
            .custom_headers
            .insert("permissions-policy".to_string(), "camera=()".to_string());
        let hardening = HeaderHardening::new(config).unwrap();
        assert_eq!(hardening.headers()["permissions-policy"], "camera=()");
    }
}
