//! JSON-aware deletion for `delete_json_field` rules
//!
//! An object is removed from the tree when one of its direct string
//! members matches the rule. Arrays are never removed as a whole, only
//! their matching elements. Content that is not a JSON object or array
//! passes through unchanged.

use crate::rule::Rule;
use serde_json::{Map, Value};
use tracing::debug;

/// Result of visiting a node
enum Visit {
    Keep(Value),
    Delete,
}

/// Remove every JSON object in `content` that has a direct string member
/// matching `rule`. Returns `content` unchanged when it isn't JSON.
pub fn delete_matching_objects(rule: &Rule, content: &[u8]) -> Vec<u8> {
    if !looks_like_json(content) {
        return content.to_vec();
    }

    let value: Value = match serde_json::from_slice(content) {
        Ok(value) => value,
        Err(e) => {
            debug!(rule = %rule.name(), error = %e, "Content is not valid JSON, skipping");
            return content.to_vec();
        }
    };

    let result = match visit(rule, value) {
        Visit::Keep(value) => value,
        // The root itself matched
        Visit::Delete => Value::Null,
    };

    match serde_json::to_vec_pretty(&result) {
        Ok(out) => out,
        Err(e) => {
            debug!(rule = %rule.name(), error = %e, "Failed to serialize JSON, skipping");
            content.to_vec()
        }
    }
}

// An object or array, ignoring surrounding whitespace
fn looks_like_json(content: &[u8]) -> bool {
    let mut significant = content.iter().filter(|b| !b.is_ascii_whitespace());
    let first = significant.next();
    let last = significant.next_back().or(first);
    matches!((first, last), (Some(b'{'), Some(b'}')) | (Some(b'['), Some(b']')))
}

fn visit(rule: &Rule, node: Value) -> Visit {
    match node {
        Value::Object(map) => visit_object(rule, map),
        Value::Array(items) => Visit::Keep(Value::Array(
            items
                .into_iter()
                .filter_map(|item| match visit(rule, item) {
                    Visit::Keep(value) => Some(value),
                    Visit::Delete => None,
                })
                .collect(),
        )),
        scalar => Visit::Keep(scalar),
    }
}

fn visit_object(rule: &Rule, map: Map<String, Value>) -> Visit {
    let matched = map
        .values()
        .any(|v| matches!(v, Value::String(s) if rule.match_bytes(s.as_bytes())));
    if matched {
        return Visit::Delete;
    }

    let mut kept = Map::with_capacity(map.len());
    for (key, value) in map {
        if let Visit::Keep(value) = visit(rule, value) {
            kept.insert(key, value);
        }
    }
    Visit::Keep(Value::Object(kept))
}
