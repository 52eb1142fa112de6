//! Value helpers and conversion rules shared by both templating stages.

use handlebars::handlebars_helper;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Converts a value to its interpolated text form.
///
/// Scalars render as their plain text, `null` as nothing, and sequences or
/// mappings as compact JSON.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Hex-encoded SHA-256 digest of a string.
#[must_use]
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Looks up a dotted path (`a.b.0.c`, `@root.a`, `this`) in a data tree.
#[must_use]
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("@root.").unwrap_or(path);
    let path = path.strip_prefix("this.").unwrap_or(path);
    if path == "this" || path == "@root" {
        return Some(data);
    }

    path.split(['.', '/']).try_fold(data, |value, segment| {
        let segment = segment.trim_start_matches('[').trim_end_matches(']');
        match value {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

// {{hash x}}: SHA-256 hex of the value's text form.
handlebars_helper!(HashHelper: |value: Json| content_hash(&stringify(value)));

// {{json x}}: compact JSON, nothing for null.
handlebars_helper!(JsonHelper: |value: Json| {
    if value.is_null() {
        String::new()
    } else {
        value.to_string()
    }
});
