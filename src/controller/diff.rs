//! # Diff
//!
//! Semantic comparison of desired and observed objects.
//!
//! Kubernetes drops empty fields on the way in, so a desired object built
//! with `Some(vec![])` and the stored object without the field must compare
//! equal. Values are compared through their JSON form with nulls, empty
//! strings, empty lists and empty maps removed.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Whether two values are equal once unset and empty fields are ignored
///
/// Values that fail to serialize are never equal.
pub fn semantic_equals<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => canonical(a) == canonical(b),
        _ => false,
    }
}

/// Whether a status write is needed after a reconcile pass
pub fn status_changed<S: Serialize>(before: Option<&S>, after: Option<&S>) -> bool {
    let before = before.and_then(|s| serde_json::to_value(s).ok());
    let after = after.and_then(|s| serde_json::to_value(s).ok());
    canonical(before.unwrap_or(Value::Null)) != canonical(after.unwrap_or(Value::Null))
}

/// Union of two label maps; entries of `b` win on conflict
pub fn merge_maps(
    a: Option<&BTreeMap<String, String>>,
    b: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String> {
    let mut merged = a.cloned().unwrap_or_default();
    if let Some(b) = b {
        merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}

fn canonical(value: Value) -> Value {
    let value = normalize(value);
    if is_empty(&value) {
        Value::Null
    } else {
        value
    }
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !is_empty(v))
                .collect();
            Value::Object(map)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        other => other,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
