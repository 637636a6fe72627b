//! HTTP parameter pollution defense

use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Collapses repeated query parameters to their last occurrence unless the
/// parameter is whitelisted as array-capable
#[derive(Debug, Clone, Default)]
pub struct PollutionGuard {
    whitelist: HashSet<String>,
}

impl PollutionGuard {
    pub fn new<I, S>(whitelist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_whitelisted(&self, name: &str) -> bool {
        self.whitelist.contains(name)
    }

    /// Collapse polluted parameters in a decoded query object; returns the
    /// names that were collapsed
    pub fn collapse(&self, query: &mut Value) -> Vec<String> {
        let Value::Object(params) = query else {
            return Vec::new();
        };

        let mut collapsed = Vec::new();
        for (name, value) in params.iter_mut() {
            if self.is_whitelisted(name) {
                continue;
            }
            if let Value::Array(items) = value {
                let count = items.len();
                let last = items.pop().unwrap_or(Value::Null);
                *value = last;
                warn!(parameter = %name, occurrences = count, "Collapsed repeated query parameter");
                collapsed.push(name.clone());
            }
        }
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::request::query_to_value;
    use serde_json::json;

    #[test]
    fn test_keeps_last_occurrence() {
        let guard = PollutionGuard::default();
        let mut query = query_to_value("role=user&role=admin&page=2");

        let collapsed = guard.collapse(&mut query);
        assert_eq!(collapsed, vec!["role".to_string()]);
        assert_eq!(query, json!({"role": "admin", "page": "2"}));
    }

    #[test]
    fn test_whitelisted_parameters_stay_arrays() {
        let guard = PollutionGuard::new(["tags"]);
        let mut query = query_to_value("tags=a&tags=b&sort=x&sort=y");

        guard.collapse(&mut query);
        assert_eq!(query, json!({"tags": ["a", "b"], "sort": "y"}));
    }

    #[test]
    fn test_non_object_is_ignored() {
        let guard = PollutionGuard::default();
        let mut query = Value::Null;
        assert!(guard.collapse(&mut query).is_empty());
    }
}
