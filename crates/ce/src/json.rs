//! Helpers for reading CE JSON documents.
//!
//! API version 1.0 encodes a list of exactly one element as the bare element.
//! Every reader of CE documents goes through [`one_or_many`] so callers always
//! see lists.

use serde_json::Value;

/// Returns the elements of `value` as a list.
///
/// Arrays yield their elements, `null` yields nothing, and any other value is
/// a one-element list.
pub fn one_or_many(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Follows a chain of object keys, returning `None` at the first missing key.
pub fn path<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().try_fold(value, |current, key| current.get(*key))
}

/// Reads a value that the CE may encode as a JSON string or number.
pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a value that the CE may encode as a JSON string or number.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn singletons_become_lists() {
        let single = json!({"id": "a"});
        assert_eq!(one_or_many(&single).len(), 1);
        let many = json!([{"id": "a"}, {"id": "b"}]);
        assert_eq!(one_or_many(&many).len(), 2);
        assert!(one_or_many(&Value::Null).is_empty());
    }

    #[test]
    fn numbers_may_be_strings() {
        assert_eq!(as_u64(&json!("3600")), Some(3600));
        assert_eq!(as_u64(&json!(3600)), Some(3600));
        assert_eq!(as_u64(&json!("soon")), None);
        assert_eq!(as_i64(&json!("-1")), Some(-1));
    }

    #[test]
    fn path_stops_at_missing_keys() {
        let doc = json!({"a": {"b": {"c": 1}}});
        assert_eq!(path(&doc, &["a", "b", "c"]), Some(&json!(1)));
        assert_eq!(path(&doc, &["a", "x", "c"]), None);
    }
}
