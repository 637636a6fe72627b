//! Sensitive-field redaction for audit metadata

use serde_json::Value;

use crate::middleware::tree::{walk_mut, KeyAction, TreeVisitor, DEFAULT_MAX_DEPTH};

/// Replacement written in place of a sensitive value
pub const REDACTION_MARKER: &str = "[REDACTED]";

pub fn default_sensitive_fields() -> Vec<String> {
    ["password", "token", "secret", "apiKey"]
        .iter()
        .map(|f| f.to_string())
        .collect()
}

/// Replaces the values of sensitive keys at any depth
///
/// Matching is a case-insensitive substring test on a normalized key, where
/// `_` and `-` are ignored: `apiKey` catches `api_key`, `X-API-KEY` and
/// `userApiKeyHash` alike.
#[derive(Debug, Clone)]
pub struct Redactor {
    needles: Vec<String>,
    max_depth: usize,
}

impl Redactor {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            needles: fields
                .into_iter()
                .map(|f| normalize(f.as_ref()))
                .filter(|f| !f.is_empty())
                .collect(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = normalize(key);
        self.needles.iter().any(|needle| key.contains(needle.as_str()))
    }

    /// Redacted copy of `value`
    pub fn redact(&self, value: &Value) -> Value {
        let mut copy = value.clone();
        walk_mut(&mut copy, self.max_depth, &mut RedactVisitor { redactor: self });
        copy
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(default_sensitive_fields())
    }
}

struct RedactVisitor<'a> {
    redactor: &'a Redactor,
}

impl TreeVisitor for RedactVisitor<'_> {
    fn visit_key(&mut self, key: &str) -> KeyAction {
        if self.redactor.is_sensitive(key) {
            KeyAction::Replace(Value::String(REDACTION_MARKER.to_string()))
        } else {
            KeyAction::Keep
        }
    }
}

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_at_any_depth() {
        let redactor = Redactor::default();
        let body = json!({
            "username": "alice",
            "Password": "hunter2",
            "profile": {
                "api_key": "abc",
                "sessions": [{"refreshToken": "t1", "device": "phone"}],
            },
            "clientSecret": {"nested": "object"},
        });

        assert_eq!(
            redactor.redact(&body),
            json!({
                "username": "alice",
                "Password": REDACTION_MARKER,
                "profile": {
                    "api_key": REDACTION_MARKER,
                    "sessions": [{"refreshToken": REDACTION_MARKER, "device": "phone"}],
                },
                "clientSecret": REDACTION_MARKER,
            })
        );
    }

    #[test]
    fn test_original_is_untouched() {
        let redactor = Redactor::default();
        let body = json!({"token": "t"});
        let _ = redactor.redact(&body);
        assert_eq!(body, json!({"token": "t"}));
    }

    #[test]
    fn test_custom_fields() {
        let redactor = Redactor::new(["ssn", "card-number"]);
        assert!(redactor.is_sensitive("SSN"));
        assert!(redactor.is_sensitive("cardNumber"));
        assert!(!redactor.is_sensitive("password"));
    }

    #[test]
    fn test_no_sensitive_value_survives() {
        let redactor = Redactor::default();
        let mut value = json!({"leaf": "x"});
        for i in 0..20 {
            value = json!({ format!("level{}", i): value, format!("token{}", i): "secret-value" });
        }

        let redacted = redactor.redact(&value);
        assert!(!redacted.to_string().contains("secret-value"));
    }
}
