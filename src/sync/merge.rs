//! JSON merge patch (RFC 7386) and the canonical comparison used for drift.

use serde_json::{Map, Value};

/// Metadata fields the API server owns; never part of a drift comparison
const SERVER_POPULATED_METADATA: &[&str] = &[
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "managedFields",
    "selfLink",
];

/// Apply `patch` to `target` in place.
///
/// Objects merge recursively, `null` removes a key, anything else replaces.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Merge patch turning `from` into `to`
#[must_use]
pub fn create_merge_patch(from: &Value, to: &Value) -> Value {
    match (from, to) {
        (Value::Object(from_map), Value::Object(to_map)) => {
            let mut patch = Map::new();
            for (key, to_value) in to_map {
                match from_map.get(key) {
                    Some(from_value) if from_value == to_value => {}
                    Some(from_value) => {
                        patch.insert(key.clone(), create_merge_patch(from_value, to_value));
                    }
                    None => {
                        patch.insert(key.clone(), to_value.clone());
                    }
                }
            }
            for key in from_map.keys().filter(|k| !to_map.contains_key(*k)) {
                patch.insert(key.clone(), Value::Null);
            }
            Value::Object(patch)
        }
        _ => to.clone(),
    }
}

/// Copy of `obj` without server-populated metadata
#[must_use]
pub fn strip_server_fields(obj: &Value) -> Value {
    let mut stripped = obj.clone();
    if let Some(metadata) = stripped.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in SERVER_POPULATED_METADATA {
            metadata.remove(*field);
        }
    }
    stripped
}

/// Compare two objects ignoring server-populated metadata.
///
/// A string holding a number equals that number, so `"8080"` from a
/// manifest matches `8080` read back from the cluster.
#[must_use]
pub fn canonical_eq(a: &Value, b: &Value) -> bool {
    values_equal(&strip_server_fields(a), &strip_server_fields(b))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, av)| b.get(key).is_some_and(|bv| values_equal(av, bv)))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(av, bv)| values_equal(av, bv))
        }
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            number_matches(n, s)
        }
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn number_matches(n: &serde_json::Number, s: &str) -> bool {
    if n.to_string() == s {
        return true;
    }
    match (n.as_f64(), s.parse::<f64>()) {
        (Some(x), Ok(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_preserves_live_only_fields() {
        let mut live = json!({
            "metadata": {"name": "web", "labels": {"team": "a"}},
            "spec": {"replicas": 1, "paused": false}
        });
        let desired = json!({
            "metadata": {"name": "web"},
            "spec": {"replicas": 3}
        });
        apply_merge_patch(&mut live, &desired);
        assert_eq!(
            live,
            json!({
                "metadata": {"name": "web", "labels": {"team": "a"}},
                "spec": {"replicas": 3, "paused": false}
            })
        );
    }

    #[test]
    fn test_merge_null_removes_and_arrays_replace() {
        let mut target = json!({"a": 1, "list": [1, 2, 3], "nested": {"x": 1}});
        apply_merge_patch(&mut target, &json!({"a": null, "list": [9], "nested": "flat"}));
        assert_eq!(target, json!({"list": [9], "nested": "flat"}));
    }

    #[test]
    fn test_create_patch_round_trips() {
        let from = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let to = json!({"a": 1, "b": {"c": 5}, "e": true});
        let patch = create_merge_patch(&from, &to);
        assert_eq!(patch, json!({"b": {"c": 5, "d": null}, "e": true}));
        let mut applied = from.clone();
        apply_merge_patch(&mut applied, &patch);
        assert_eq!(applied, to);
    }

    #[test]
    fn test_canonical_eq_ignores_server_metadata() {
        let live = json!({
            "metadata": {"name": "web", "resourceVersion": "17", "uid": "u-1",
                         "managedFields": [{"manager": "kubectl"}]},
            "data": {"k": "v"}
        });
        let desired = json!({"metadata": {"name": "web"}, "data": {"k": "v"}});
        assert!(canonical_eq(&live, &desired));
    }

    #[test]
    fn test_canonical_eq_numeric_strings() {
        assert!(canonical_eq(
            &json!({"spec": {"port": 8080, "weight": 0.5}}),
            &json!({"spec": {"port": "8080", "weight": "0.5"}})
        ));
        assert!(!canonical_eq(
            &json!({"spec": {"port": 8080}}),
            &json!({"spec": {"port": "http"}})
        ));
        // Padding is a real difference in a string field
        assert!(!canonical_eq(
            &json!({"spec": {"port": 8080}}),
            &json!({"spec": {"port": " 8080 "}})
        ));
    }

    #[test]
    fn test_canonical_eq_detects_changes() {
        assert!(!canonical_eq(
            &json!({"spec": {"replicas": 1}}),
            &json!({"spec": {"replicas": 2}})
        ));
        assert!(!canonical_eq(
            &json!({"spec": {"replicas": 1}}),
            &json!({"spec": {"replicas": 1, "paused": true}})
        ));
        assert!(!canonical_eq(&json!([1, 2]), &json!([2, 1])));
    }
}
