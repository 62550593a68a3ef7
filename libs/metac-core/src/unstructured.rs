//! [`UnstructuredExt`] gives `serde_json::Value` the same metadata-accessor
//! surface `kube::ResourceExt` gives a typed object — the engine never knows
//! the shape of `spec`/`status` ahead of time, so it only ever reaches for
//! the conventional `metadata.*` fields spec.md §3 names.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// The JSON analogue of `kube::ResourceExt`, implemented for any JSON value
/// that is expected to carry Kubernetes-shaped `apiVersion`/`kind`/`metadata`.
pub trait UnstructuredExt {
    fn api_version(&self) -> Option<&str>;
    fn kind(&self) -> Option<&str>;
    fn name(&self) -> Option<&str>;
    fn namespace(&self) -> Option<&str>;
    fn uid(&self) -> Option<&str>;
    fn resource_version(&self) -> Option<&str>;
    fn deletion_timestamp(&self) -> Option<&str>;
    fn labels(&self) -> BTreeMap<String, String>;
    fn annotations(&self) -> BTreeMap<String, String>;
    fn annotation(&self, key: &str) -> Option<&str>;
    fn finalizers(&self) -> Vec<String>;
    fn owner_references(&self) -> &[Value];

    fn set_annotation(&mut self, key: &str, value: impl Into<String>);
    fn remove_annotation(&mut self, key: &str);
    fn push_owner_reference(&mut self, owner_ref: Value);
    fn set_finalizers(&mut self, finalizers: Vec<String>);
}

impl UnstructuredExt for Value {
    fn api_version(&self) -> Option<&str> {
        self.get("apiVersion").and_then(Value::as_str)
    }

    fn kind(&self) -> Option<&str> {
        self.get("kind").and_then(Value::as_str)
    }

    fn name(&self) -> Option<&str> {
        self.pointer("/metadata/name").and_then(Value::as_str)
    }

    fn namespace(&self) -> Option<&str> {
        self.pointer("/metadata/namespace").and_then(Value::as_str)
    }

    fn uid(&self) -> Option<&str> {
        self.pointer("/metadata/uid").and_then(Value::as_str)
    }

    fn resource_version(&self) -> Option<&str> {
        self.pointer("/metadata/resourceVersion").and_then(Value::as_str)
    }

    fn deletion_timestamp(&self) -> Option<&str> {
        self.pointer("/metadata/deletionTimestamp").and_then(Value::as_str)
    }

    fn labels(&self) -> BTreeMap<String, String> {
        string_map(self.pointer("/metadata/labels"))
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        string_map(self.pointer("/metadata/annotations"))
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.pointer("/metadata/annotations")
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
    }

    fn finalizers(&self) -> Vec<String> {
        self.pointer("/metadata/finalizers")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
            .unwrap_or_default()
    }

    fn owner_references(&self) -> &[Value] {
        self.pointer("/metadata/ownerReferences")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        let annotations = ensure_object_path(self, &["metadata", "annotations"]);
        annotations.insert(key.to_owned(), Value::String(value.into()));
    }

    fn remove_annotation(&mut self, key: &str) {
        if let Some(annotations) = self.pointer_mut("/metadata/annotations").and_then(Value::as_object_mut) {
            annotations.remove(key);
        }
    }

    fn push_owner_reference(&mut self, owner_ref: Value) {
        let metadata = ensure_object_path(self, &["metadata"]);
        let refs = metadata
            .entry("ownerReferences")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(arr) = refs {
            arr.push(owner_ref);
        }
    }

    fn set_finalizers(&mut self, finalizers: Vec<String>) {
        let metadata = ensure_object_path(self, &["metadata"]);
        metadata.insert(
            "finalizers".to_owned(),
            Value::Array(finalizers.into_iter().map(Value::String).collect()),
        );
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}

/// Walks `root` creating empty objects along `path`, returning the object at
/// the end — the JSON equivalent of `entry(..).or_insert_with(..)` chained
/// across several levels.
fn ensure_object_path<'a>(root: &'a mut Value, path: &[&str]) -> &'a mut Map<String, Value> {
    let mut current = root;
    for segment in path {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()
            .unwrap()
            .entry(*segment)
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    current.as_object_mut().unwrap()
}
