//! Input sanitization
//!
//! Strings are cleaned in three steps: NUL and other control characters are
//! stripped, the five HTML-significant characters are entity-escaped, and
//! surrounding whitespace is trimmed. Object keys get the same treatment as
//! string values.
//!
//! Escaping is one-pass safe: an `&` that already starts one of the entities
//! this module emits is left alone, so sanitizing twice gives the same result
//! as sanitizing once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::tree::{walk_mut, KeyAction, TreeVisitor, WalkStats, DEFAULT_MAX_DEPTH};

/// Entities produced by [`escape_html`]
const EMITTED_ENTITIES: &[&str] = &["&amp;", "&lt;", "&gt;", "&quot;", "&#x27;"];

/// Sanitizer options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerOptions {
    /// HTML-entity-escape `& < > " '`
    #[serde(default = "default_true")]
    pub escape_html: bool,

    /// Strip control characters other than `\n`, `\r` and `\t` (NUL is always stripped)
    #[serde(default = "default_true")]
    pub strip_control: bool,

    #[serde(default = "default_true")]
    pub trim: bool,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_true() -> bool { true }
fn default_max_depth() -> usize { DEFAULT_MAX_DEPTH }

impl Default for SanitizerOptions {
    fn default() -> Self {
        Self {
            escape_html: true,
            strip_control: true,
            trim: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Recursive sanitizer for request value trees
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    options: SanitizerOptions,
}

impl Sanitizer {
    pub fn new(options: SanitizerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SanitizerOptions {
        &self.options
    }

    /// Sanitize a whole tree, returning the cleaned copy
    pub fn sanitize(&self, mut tree: Value) -> Value {
        self.sanitize_in_place(&mut tree);
        tree
    }

    /// Sanitize a tree in place
    pub fn sanitize_in_place(&self, tree: &mut Value) -> WalkStats {
        let stats = walk_mut(tree, self.options.max_depth, &mut SanitizeVisitor { sanitizer: self });
        if stats.truncated > 0 {
            warn!(
                truncated = stats.truncated,
                max_depth = self.options.max_depth,
                "Input nested deeper than allowed, truncated"
            );
        }
        stats
    }

    /// Sanitize a single string
    pub fn sanitize_text(&self, text: &str) -> String {
        let stripped: String = text
            .chars()
            .filter(|&c| c != '\0')
            .filter(|&c| !self.options.strip_control || !is_stripped_control(c))
            .collect();

        let escaped = if self.options.escape_html {
            escape_html(&stripped)
        } else {
            stripped
        };

        if self.options.trim {
            escaped.trim().to_string()
        } else {
            escaped
        }
    }
}

struct SanitizeVisitor<'a> {
    sanitizer: &'a Sanitizer,
}

impl TreeVisitor for SanitizeVisitor<'_> {
    fn visit_key(&mut self, key: &str) -> KeyAction {
        let cleaned = self.sanitizer.sanitize_text(key);
        if cleaned == key {
            KeyAction::Keep
        } else {
            KeyAction::Rename(cleaned)
        }
    }

    fn visit_string(&mut self, value: &mut String) {
        let cleaned = self.sanitizer.sanitize_text(value);
        if cleaned != *value {
            *value = cleaned;
        }
    }
}

fn is_stripped_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\n' | '\r' | '\t')
}

/// Escape raw `& < > " '`; already-emitted entities pass through unchanged
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (idx, c) in input.char_indices() {
        match c {
            '&' => {
                let rest = &input[idx..];
                if EMITTED_ENTITIES.iter().any(|entity| rest.starts_with(entity)) {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}
