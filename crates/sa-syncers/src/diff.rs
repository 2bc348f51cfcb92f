//! Field-wise diff helpers shared by every syncer (`SPEC_FULL.md` §4.6).
//!
//! A field counts as "changed" only if the normalized values differ **and**
//! the new value is non-empty — an empty/absent new value never overwrites
//! an existing one.

use serde_json::{Map, Value};

fn is_empty(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

/// Returns the subset of `candidate` whose values differ from `existing`
/// under the "changed" rule above.
pub fn diff_fields(existing: &Map<String, Value>, candidate: &Map<String, Value>) -> Map<String, Value> {
    let mut changes = Map::new();
    for (field, new_value) in candidate {
        if is_empty(new_value) {
            continue;
        }
        let current = existing.get(field).cloned().unwrap_or(Value::Null);
        if &current != new_value {
            changes.insert(field.clone(), new_value.clone());
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_new_value_never_overwrites() {
        let existing = json!({"mobile_phone": "+15550000000"}).as_object().unwrap().clone();
        let candidate = json!({"mobile_phone": ""}).as_object().unwrap().clone();
        assert!(diff_fields(&existing, &candidate).is_empty());
    }

    #[test]
    fn changed_non_empty_value_is_reported() {
        let existing = json!({"mobile_phone": "+15550000000"}).as_object().unwrap().clone();
        let candidate = json!({"mobile_phone": "+15559998888"}).as_object().unwrap().clone();
        let changes = diff_fields(&existing, &candidate);
        assert_eq!(changes.get("mobile_phone"), Some(&json!("+15559998888")));
    }

    #[test]
    fn unchanged_value_is_not_reported() {
        let existing = json!({"email": "a@b.com"}).as_object().unwrap().clone();
        let candidate = json!({"email": "a@b.com"}).as_object().unwrap().clone();
        assert!(diff_fields(&existing, &candidate).is_empty());
    }
}
