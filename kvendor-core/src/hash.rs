//! Order-independent content hashing for structured documents.
//!
//! A document is rendered into a canonical text form, with mapping keys
//! sorted recursively, and the canonical bytes are SHA-256 hashed. Two
//! documents that differ only in key order hash identically.

use serde_yaml::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the canonical form of `value`.
///
/// `Null` and an empty mapping hash to the empty string sentinel.
pub fn content_hash(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Mapping(map) if map.is_empty() => String::new(),
        other => hash_str(&canonical(other)),
    }
}

/// Lowercase hex SHA-256 of a string.
pub fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical text form of `value`: compact, with every mapping's entries
/// sorted by their canonical key text.
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('~'),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => push_quoted(s, out),
        Value::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Mapping(map) => {
            let mut entries: Vec<(String, &Value)> =
                map.iter().map(|(k, v)| (canonical(k), v)).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&key);
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Tagged(tagged) => {
            out.push_str(&tagged.tag.to_string());
            out.push(' ');
            write_canonical(&tagged.value, out);
        }
    }
}

fn push_quoted(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}
