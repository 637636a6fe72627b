//! Structural injection defense
//!
//! Document databases interpret object keys such as `$gt` or `$where` as
//! query operators. The guard renames any key starting with an operator
//! prefix so it reaches application code as inert data. Requests are never
//! rejected here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::tree::{walk_mut, KeyAction, TreeVisitor, DEFAULT_MAX_DEPTH};

/// Injection guard options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionGuardConfig {
    /// Characters that mark a key as an operator when they lead it
    #[serde(default = "default_prefixes")]
    pub operator_prefixes: Vec<char>,

    /// Text prepended to a neutralized key
    #[serde(default = "default_replacement")]
    pub replacement: String,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_prefixes() -> Vec<char> { vec!['$'] }
fn default_replacement() -> String { "_".to_string() }
fn default_max_depth() -> usize { DEFAULT_MAX_DEPTH }

impl Default for InjectionGuardConfig {
    fn default() -> Self {
        Self {
            operator_prefixes: default_prefixes(),
            replacement: default_replacement(),
            max_depth: default_max_depth(),
        }
    }
}

/// Renames operator-prefixed keys
#[derive(Debug, Clone, Default)]
pub struct InjectionGuard {
    config: InjectionGuardConfig,
}

impl InjectionGuard {
    pub fn new(config: InjectionGuardConfig) -> Self {
        Self { config }
    }

    /// Neutralized form of a key, or `None` if the key is harmless
    pub fn neutralize_key(&self, key: &str) -> Option<String> {
        let first = key.chars().next()?;
        if self.config.operator_prefixes.contains(&first) {
            Some(format!("{}{}", self.config.replacement, key))
        } else {
            None
        }
    }

    /// Rename offending keys anywhere in `tree`; returns the original names
    /// of the keys that were rewritten
    pub fn neutralize(&self, channel: &str, tree: &mut Value) -> Vec<String> {
        let mut visitor = NeutralizeVisitor {
            guard: self,
            renamed: Vec::new(),
        };
        walk_mut(tree, self.config.max_depth, &mut visitor);

        for key in &visitor.renamed {
            warn!(channel, key = %key, "Neutralized operator-prefixed key");
        }
        visitor.renamed
    }
}

struct NeutralizeVisitor<'a> {
    guard: &'a InjectionGuard,
    renamed: Vec<String>,
}

impl TreeVisitor for NeutralizeVisitor<'_> {
    fn visit_key(&mut self, key: &str) -> KeyAction {
        match self.guard.neutralize_key(key) {
            Some(neutralized) => {
                self.renamed.push(key.to_string());
                KeyAction::Rename(neutralized)
            }
            None => KeyAction::Keep,
        }
    }
}
