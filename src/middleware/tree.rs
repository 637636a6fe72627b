//! Depth-bounded traversal over request value trees
//!
//! Sanitization, injection neutralization and audit redaction all rewrite
//! arbitrarily nested JSON-like values. They share one iterative walk with
//! an explicit stack so deeply nested input cannot exhaust the call stack.

use serde_json::{Map, Value};
use tracing::warn;

/// Default nesting limit; nodes below it are replaced by `null`
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// What to do with an object entry, decided from its key
#[derive(Debug, Clone, PartialEq)]
pub enum KeyAction {
    Keep,
    Rename(String),
    /// Keep the key, replace the whole value
    Replace(Value),
}

/// Callbacks invoked during [`walk_mut`]
pub trait TreeVisitor {
    fn visit_key(&mut self, _key: &str) -> KeyAction {
        KeyAction::Keep
    }

    fn visit_string(&mut self, _value: &mut String) {}
}

/// Summary of a walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub visited: usize,
    /// Subtrees cut off because they exceeded the depth limit
    pub truncated: usize,
    /// Renamed keys that had to be suffixed to avoid overwriting a sibling
    pub collisions: usize,
}

/// Visit every reachable node exactly once, rewriting keys and strings in place
pub fn walk_mut<V: TreeVisitor>(root: &mut Value, max_depth: usize, visitor: &mut V) -> WalkStats {
    let mut stats = WalkStats::default();
    let mut stack: Vec<(&mut Value, usize)> = vec![(root, 0)];

    while let Some((node, depth)) = stack.pop() {
        if depth > max_depth {
            *node = Value::Null;
            stats.truncated += 1;
            continue;
        }
        stats.visited += 1;

        match node {
            Value::String(s) => visitor.visit_string(s),
            Value::Array(items) => {
                for item in items.iter_mut() {
                    stack.push((item, depth + 1));
                }
            }
            Value::Object(map) => {
                let entries = std::mem::take(map);
                let mut rebuilt = Map::new();
                let mut renamed = Vec::new();
                for (key, value) in entries {
                    match visitor.visit_key(&key) {
                        KeyAction::Keep => {
                            rebuilt.insert(key, value);
                        }
                        KeyAction::Rename(target) => renamed.push((key, target, value)),
                        KeyAction::Replace(replacement) => {
                            rebuilt.insert(key, replacement);
                        }
                    }
                }
                // Unchanged keys keep their names; renamed ones yield on collision
                for (original, target, value) in renamed {
                    let key = if rebuilt.contains_key(&target) {
                        let free = free_key(&rebuilt, &target);
                        warn!(key = %original, renamed = %free, "Renamed key collided with a sibling");
                        stats.collisions += 1;
                        free
                    } else {
                        target
                    };
                    rebuilt.insert(key, value);
                }
                *map = rebuilt;
                for value in map.values_mut() {
                    stack.push((value, depth + 1));
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    stats
}

/// First of `wanted~1`, `wanted~2`, ... not present in `map`
fn free_key(map: &Map<String, Value>, wanted: &str) -> String {
    let mut n = 1usize;
    loop {
        let candidate = format!("{}~{}", wanted, n);
        if !map.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
