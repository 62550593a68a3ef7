//! The object registry (spec.md §4.2, C2): a two-level index of
//! unstructured objects by `(apiVersion, kind)` then by relative name.

use std::collections::HashMap;

use serde_json::Value;

use crate::unstructured::UnstructuredExt;
use crate::watch::{GroupKind, Watch};

/// `(apiVersion, kind) -> relative name -> object`. One registry exists per
/// reconcile and is discarded once `Apply` returns — nothing here is shared
/// across reconciles, so no locking is required (spec.md §5).
#[derive(Debug, Clone, Default)]
pub struct Registry {
    groups: HashMap<GroupKind, HashMap<String, Value>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a `(apiVersion, kind)` partition exists, empty if new.
    pub fn init(&mut self, group_kind: GroupKind) {
        self.groups.entry(group_kind).or_default();
    }

    /// Inserts `obj` keyed by its own `(apiVersion, kind)` and its bare name
    /// — used when the registry's scope is already namespaced (or the
    /// object's namespace should be ignored), e.g. for desired/explicit maps
    /// keyed purely by name within their own partition.
    pub fn insert(&mut self, obj: Value) -> Option<GroupKind> {
        let group_kind = GroupKind::of(&obj)?;
        let name = obj.name().unwrap_or_default().to_owned();
        self.groups.entry(group_kind.clone()).or_default().insert(name, obj);
        Some(group_kind)
    }

    /// Inserts `obj` keyed by the relative-name rule relative to `watch`
    /// (spec.md §3): `"<namespace>/<name>"` when the watch is cluster-scoped
    /// and the object is namespaced, `"<name>"` otherwise.
    pub fn insert_by_reference(&mut self, watch: &Watch, obj: Value) -> Option<GroupKind> {
        let group_kind = GroupKind::of(&obj)?;
        let name = relative_name(watch, &obj);
        self.groups.entry(group_kind.clone()).or_default().insert(name, obj);
        Some(group_kind)
    }

    /// Whole-entry replacement; a no-op if the `(kind, apiVersion, name)` is
    /// absent, per spec.md §4.2.
    pub fn replace(&mut self, obj: Value) {
        if let Some(group_kind) = GroupKind::of(&obj) {
            let name = obj.name().unwrap_or_default().to_owned();
            if let Some(partition) = self.groups.get_mut(&group_kind) {
                if partition.contains_key(&name) {
                    partition.insert(name, obj);
                }
            }
        }
    }

    pub fn replace_by_reference(&mut self, watch: &Watch, obj: Value) {
        if let Some(group_kind) = GroupKind::of(&obj) {
            let name = relative_name(watch, &obj);
            if let Some(partition) = self.groups.get_mut(&group_kind) {
                if partition.contains_key(&name) {
                    partition.insert(name, obj);
                }
            }
        }
    }

    /// Scans by `(group, kind, name)` ignoring version — there may be at
    /// most one match across versions in practice, but this returns the
    /// first hit, matching spec.md §4.2's documented scanner behaviour.
    pub fn find_by_group_kind_name(&self, group: &str, kind: &str, name: &str) -> Option<&Value> {
        self.groups
            .iter()
            .find(|(gk, _)| gk.kind == kind && group_matches(&gk.api_version, group))
            .and_then(|(_, partition)| partition.get(name))
    }

    pub fn group_kinds(&self) -> impl Iterator<Item = &GroupKind> {
        self.groups.keys()
    }

    pub fn partition(&self, group_kind: &GroupKind) -> Option<&HashMap<String, Value>> {
        self.groups.get(group_kind)
    }

    /// Unspecified order, per spec.md §4.2.
    pub fn list(&self) -> Vec<&Value> {
        self.groups.values().flat_map(|partition| partition.values()).collect()
    }

    /// Counts entries whose payload is non-null.
    pub fn len(&self) -> usize {
        self.groups.values().flat_map(|p| p.values()).filter(|v| !v.is_null()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `apiVersion` strings embed the group (`"<group>/<version>"` or just
/// `"<version>"` for the core group); `group` here is compared against the
/// group portion only, matching `findByGroupKindName`'s "ignoring version".
fn group_matches(api_version: &str, group: &str) -> bool {
    let this_group = api_version.split('/').next().unwrap_or(api_version);
    if group.is_empty() {
        return this_group == api_version || api_version.starts_with(&format!("{group}/"));
    }
    this_group == group
}

fn relative_name(watch: &Watch, obj: &Value) -> String {
    let name = obj.name().unwrap_or_default();
    match obj.namespace() {
        Some(ns) if watch.namespace.is_empty() && !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_owned(),
    }
}
