//! The three-way merge / apply engine (spec.md §4.1, C1).
//!
//! Re-creates server-side `kubectl apply` semantics locally on arbitrary
//! JSON documents: `lastApplied` says what to delete, `desired` says what to
//! set, and anything present only in `observed` is foreign and left alone.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Merge-key candidates, in preference order, for list-map detection.
const MERGE_KEY_PREFERENCE: [&str; 5] = ["containerPort", "port", "name", "uid", "ip"];

/// System-populated metadata fields merge output must never diverge from
/// `observed` on (spec.md §3 invariants, §4.1 "Revert of system/status fields").
const SYSTEM_METADATA_FIELDS: [&str; 6] = [
    "selfLink",
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
];

/// Computes the three-way merge of `observed`, `lastApplied`, and `desired`.
///
/// All three must be JSON objects at the top level — Kubernetes unstructured
/// documents always are. Anything else is a shape mismatch and is reported
/// rather than silently papered over, per spec.md §7's "Merge" error class.
pub fn merge(observed: &Value, last_applied: &Value, desired: &Value) -> Result<Value> {
    for (label, v) in [("observed", observed), ("lastApplied", last_applied), ("desired", desired)] {
        if !v.is_object() {
            return Err(Error::Merge {
                path: "$".to_owned(),
                reason: format!("{label} must be a JSON object, got {}", type_name(v)),
            });
        }
    }
    let mut merged = merge_node(observed, last_applied, desired);
    revert_system_fields(&mut merged, observed);
    Ok(merged)
}

/// True iff `merged` differs from `observed` by structural equality — the
/// signal upstream code uses to skip a no-op update.
pub fn has_merge_diff(merged: &Value, observed: &Value) -> bool {
    merged != observed
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Dispatches on `desired`'s shape: an object recurses key-by-key, an array
/// attempts list-map detection, anything else is a full scalar replacement.
fn merge_node(observed: &Value, last_applied: &Value, desired: &Value) -> Value {
    match desired {
        Value::Object(desired_map) => {
            let observed_map = observed.as_object().cloned().unwrap_or_default();
            let la_map = last_applied.as_object().cloned().unwrap_or_default();
            Value::Object(merge_object(&observed_map, &la_map, desired_map))
        }
        Value::Array(desired_arr) => merge_array(observed.as_array(), last_applied.as_array(), desired_arr),
        _ => desired.clone(),
    }
}

/// The map-node rule: delete keys dropped between `lastApplied` and
/// `desired`, recurse into every key `desired` names, and leave anything
/// only `observed` knows about untouched.
fn merge_object(
    observed: &Map<String, Value>,
    last_applied: &Map<String, Value>,
    desired: &Map<String, Value>,
) -> Map<String, Value> {
    let mut dest = observed.clone();
    for key in last_applied.keys() {
        if !desired.contains_key(key) {
            dest.remove(key);
        }
    }
    for (key, desired_val) in desired {
        let observed_val = observed.get(key).cloned().unwrap_or(Value::Null);
        let la_val = last_applied.get(key).cloned().unwrap_or(Value::Null);
        dest.insert(key.clone(), merge_node(&observed_val, &la_val, desired_val));
    }
    dest
}

fn merge_array(observed: Option<&Vec<Value>>, last_applied: Option<&Vec<Value>>, desired: &[Value]) -> Value {
    match detect_merge_key(observed, last_applied, desired) {
        Some(key) => merge_list_map(observed, last_applied, desired, &key),
        None => Value::Array(desired.to_vec()),
    }
}

/// Picks the list-map merge key per spec.md §4.1: every element of every
/// non-empty array among the three must be a map, and the chosen key is the
/// first name from [`MERGE_KEY_PREFERENCE`] common to *every* element seen.
fn detect_merge_key(observed: Option<&Vec<Value>>, last_applied: Option<&Vec<Value>>, desired: &[Value]) -> Option<String> {
    let arrays: Vec<&[Value]> = [observed.map(Vec::as_slice), last_applied.map(Vec::as_slice), Some(desired)]
        .into_iter()
        .flatten()
        .collect();

    if arrays.iter().flat_map(|arr| arr.iter()).any(|v| !v.is_object()) {
        return None;
    }

    let mut common_keys: Option<HashSet<&str>> = None;
    for arr in &arrays {
        if arr.is_empty() {
            continue;
        }
        for elem in arr.iter() {
            let keys: HashSet<&str> = elem.as_object().map(|m| m.keys().map(String::as_str).collect()).unwrap_or_default();
            common_keys = Some(match common_keys {
                None => keys,
                Some(acc) => acc.intersection(&keys).copied().collect(),
            });
        }
    }
    let common_keys = common_keys?;
    MERGE_KEY_PREFERENCE.iter().find(|k| common_keys.contains(*k)).map(|k| k.to_string())
}

/// Rekeys each array as `{mergeKeyValue -> elem}`, merges those maps with
/// the same map-node rule, then rebuilds the array: `dest` order first, then
/// any new `desired` items not yet emitted.
fn merge_list_map(observed: Option<&Vec<Value>>, last_applied: Option<&Vec<Value>>, desired: &[Value], key: &str) -> Value {
    let (observed_order, observed_map) = rekey(observed.map(Vec::as_slice).unwrap_or(&[]), key);
    let (_, la_map) = rekey(last_applied.map(Vec::as_slice).unwrap_or(&[]), key);
    let (desired_order, desired_map) = rekey(desired, key);

    let merged_map = merge_object(&observed_map, &la_map, &desired_map);

    let mut emitted = HashSet::new();
    let mut result = Vec::new();
    for k in observed_order.iter().chain(desired_order.iter()) {
        if emitted.contains(k) {
            continue;
        }
        if let Some(v) = merged_map.get(k) {
            result.push(v.clone());
            emitted.insert(k.clone());
        }
    }
    Value::Array(result)
}

/// Builds the ordered key list and the `key -> element` map for one array,
/// using `merge_key_string` so non-string merge keys still collide correctly.
fn rekey(arr: &[Value], key: &str) -> (Vec<String>, Map<String, Value>) {
    let mut order = Vec::with_capacity(arr.len());
    let mut map = Map::new();
    for elem in arr {
        let value = elem.get(key).cloned().unwrap_or(Value::Null);
        let k = merge_key_string(&value);
        order.push(k.clone());
        map.insert(k, elem.clone());
    }
    (order, map)
}

/// `fmt("%v", val)` equivalent: the merge key's string form for lookup, so a
/// numeric or boolean merge key still collides correctly with itself.
fn merge_key_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

/// Restores the system-populated metadata fields and the whole `status`
/// subtree from `observed`, removing them from `merged` if `observed` never
/// had them (spec.md §3 invariants, §4.1).
fn revert_system_fields(merged: &mut Value, observed: &Value) {
    for field in SYSTEM_METADATA_FIELDS {
        let pointer = format!("/metadata/{field}");
        match observed.pointer(&pointer) {
            Some(value) => set_pointer(merged, &["metadata", field], value.clone()),
            None => {
                if let Some(metadata) = merged.get_mut("metadata").and_then(Value::as_object_mut) {
                    metadata.remove(field);
                }
            }
        }
    }

    match observed.get("status") {
        Some(status) => {
            if let Some(obj) = merged.as_object_mut() {
                obj.insert("status".to_owned(), status.clone());
            }
        }
        None => {
            if let Some(obj) = merged.as_object_mut() {
                obj.remove("status");
            }
        }
    }
}

fn set_pointer(root: &mut Value, path: &[&str], value: Value) {
    let mut current = root;
    for segment in &path[..path.len() - 1] {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current.as_object_mut().unwrap().entry(*segment).or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    current.as_object_mut().unwrap().insert(path[path.len() - 1].to_owned(), value);
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    #[test]
    fn s1_add_label_with_last_applied() {
        let observed = json!({"metadata": {"labels": {"a": "1"}}});
        let last_applied = json!({"metadata": {"labels": {"a": "1"}}});
        let desired = json!({"metadata": {"labels": {"a": "1", "b": "2"}}});
        let merged = merge(&observed, &last_applied, &desired).unwrap();
        assert_json_eq!(merged, json!({"metadata": {"labels": {"a": "1", "b": "2"}}}));
        assert!(has_merge_diff(&merged, &observed));
    }

    #[test]
    fn s2_remove_label_via_patch_mode() {
        let observed = json!({"metadata": {"labels": {"a": "1", "b": "2"}}});
        let last_applied = observed.clone();
        let desired = json!({"metadata": {"labels": {"a": "1"}}});
        let merged = merge(&observed, &last_applied, &desired).unwrap();
        assert_json_eq!(merged, json!({"metadata": {"labels": {"a": "1"}}}));
        assert!(has_merge_diff(&merged, &observed));
    }

    #[test]
    fn s6_three_way_delete_via_last_applied() {
        let observed = json!({"a": "old", "b": "old", "c": "old"});
        let last_applied = json!({"b": "old", "c": "old"});
        let desired = json!({"c": "new", "d": "new"});
        let merged = merge(&observed, &last_applied, &desired).unwrap();
        assert_json_eq!(merged, json!({"a": "old", "c": "new", "d": "new"}));
    }

    #[test]
    fn list_map_merge_key_selection() {
        let observed = json!([{"name": "a", "v": 1}, {"name": "b"}]);
        let last_applied = json!([{"name": "b"}]);
        let desired = json!([{"name": "c"}]);
        let merged = merge_node(&observed, &last_applied, &desired);
        assert_json_eq!(merged, json!([{"name": "a", "v": 1}, {"name": "c"}]));
    }

    #[test]
    fn s5_list_map_partial_order_preserved() {
        let observed = json!([{"name": "b"}, {"name": "a"}]);
        let last_applied = observed.clone();
        let desired = json!([{"name": "a"}, {"name": "b"}]);
        let merged = merge_node(&observed, &last_applied, &desired);
        assert_json_eq!(merged, json!([{"name": "b"}, {"name": "a"}]));
    }

    #[test]
    fn no_known_merge_key_arrays_replace() {
        let observed = json!([{"x": 1}, {"x": 2}]);
        let desired = json!([{"x": 3}]);
        let merged = merge_node(&observed, &Value::Null, &desired);
        assert_json_eq!(merged, json!([{"x": 3}]));
    }

    #[test]
    fn system_field_invariance() {
        let observed = json!({
            "metadata": {"uid": "u1", "resourceVersion": "42", "labels": {"a": "1"}},
            "status": {"phase": "Running"}
        });
        let last_applied = json!({"metadata": {"labels": {"a": "1"}}});
        let desired = json!({"metadata": {"labels": {"a": "1", "b": "2"}}, "status": {"phase": "ignored"}});
        let merged = merge(&observed, &last_applied, &desired).unwrap();
        assert_eq!(merged.pointer("/metadata/uid").unwrap(), "u1");
        assert_eq!(merged.pointer("/metadata/resourceVersion").unwrap(), "42");
        assert_eq!(merged["status"], json!({"phase": "Running"}));
    }

    #[test]
    fn system_field_absent_in_observed_is_removed_from_merged() {
        let observed = json!({"metadata": {"labels": {}}});
        let last_applied = json!({});
        let desired = json!({"metadata": {"uid": "injected-by-webhook", "labels": {}}});
        let merged = merge(&observed, &last_applied, &desired).unwrap();
        assert_eq!(merged.pointer("/metadata/uid"), None);
    }

    #[test]
    fn idempotent_after_first_reconcile() {
        let observed = json!({"metadata": {"labels": {"a": "1"}}, "spec": {"replicas": 1}});
        let last_applied = json!({"metadata": {"labels": {}}});
        let desired = json!({"metadata": {"labels": {"a": "1", "b": "2"}}, "spec": {"replicas": 3}});
        let m1 = merge(&observed, &last_applied, &desired).unwrap();
        let m2 = merge(&m1, &desired, &desired).unwrap();
        assert_json_eq!(m1, m2);
    }

    #[test]
    fn top_level_shape_mismatch_is_an_error() {
        let observed = json!([1, 2, 3]);
        let last_applied = json!({});
        let desired = json!({});
        let err = merge(&observed, &last_applied, &desired).unwrap_err();
        assert!(matches!(err, Error::Merge { .. }));
    }
}
