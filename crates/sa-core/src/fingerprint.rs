//! Content-addressed fingerprinting used by the failed-sync memory (`SPEC_FULL.md` §4.3).
//!
//! Normalization rules: scalars are `str(value).strip()`, `None` becomes `""`, and
//! dicts/lists are re-serialized as canonical JSON with sorted keys before hashing.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Normalize a JSON value to the string that gets hashed.
pub fn normalize(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => canonical_json(value),
    }
}

/// Re-serialize with object keys sorted at every level, matching Python's
/// `json.dumps(value, sort_keys=True)`.
fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).unwrap_or_default()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), sort_keys(&map[k]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex digest of the normalized form of `value`.
pub fn fingerprint(value: &Value) -> String {
    let normalized = normalize(value);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convenience wrapper for plain strings (the common case: a single payload field).
pub fn fingerprint_str(value: &str) -> String {
    fingerprint(&Value::String(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_deterministic_and_idempotent() {
        let a = fingerprint(&json!("john.doe@example.com"));
        let b = fingerprint(&json!("john.doe@example.com"));
        assert_eq!(a, b);
        assert_eq!(fingerprint(&json!("john.doe@example.com")), a);
    }

    #[test]
    fn null_maps_to_empty_string_fingerprint() {
        assert_eq!(fingerprint(&Value::Null), fingerprint(&json!("")));
    }

    #[test]
    fn object_key_order_does_not_affect_fingerprint() {
        let a = fingerprint(&json!({"a": 1, "b": 2}));
        let b = fingerprint(&json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn whitespace_is_stripped_for_scalars() {
        assert_eq!(fingerprint(&json!("  x  ")), fingerprint(&json!("x")));
    }
}
