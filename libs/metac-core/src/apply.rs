//! The apply adapter (spec.md §4.6, C6): wraps the merge engine (C1) with
//! annotation-based last-applied get/set/sanitise, keyed per-watch so
//! independent controllers can maintain independent three-way merges on the
//! same object (spec.md §9).

use serde_json::Value;

use crate::error::{Error, Result};
use crate::merge;
use crate::unstructured::UnstructuredExt;

/// Wraps [`merge::merge`] with the last-applied annotation plumbing
/// described in spec.md §4.1. One instance per annotation key, so a
/// per-watch key and the package default key behave identically.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    last_applied_key: String,
}

impl ApplyContext {
    pub fn new(last_applied_key: impl Into<String>) -> Self {
        Self {
            last_applied_key: last_applied_key.into(),
        }
    }

    pub fn last_applied_key(&self) -> &str {
        &self.last_applied_key
    }

    /// Parses the last-applied snapshot off `obj`. Absent or unparsable is
    /// treated as "no history yet" — an empty object, so the map-node rule's
    /// "keys in lastApplied not in desired" loop simply never fires.
    pub fn get_last_applied(&self, obj: &Value) -> Value {
        obj.annotation(&self.last_applied_key)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// Removes this context's own annotation from *within* a snapshot before
    /// it is stored or merged against, preventing the snapshot from nesting
    /// itself recursively.
    pub fn sanitise(&self, snapshot: &Value) -> Value {
        let mut sanitised = snapshot.clone();
        sanitised.remove_annotation(&self.last_applied_key);
        sanitised
    }

    /// Writes a sanitised snapshot onto `obj`'s last-applied annotation as
    /// encoded JSON.
    pub fn set_last_applied(&self, obj: &mut Value, snapshot: &Value) -> Result<()> {
        let encoded = serde_json::to_string(snapshot)
            .map_err(|e| Error::Apply(format!("encoding last-applied snapshot: {e}")))?;
        obj.set_annotation(&self.last_applied_key, encoded);
        Ok(())
    }

    /// Stamps `obj`'s own sanitised content onto its last-applied annotation
    /// — used once at create time (spec.md §4.4 "Create" step 1), before any
    /// controller-injected fields (ownership, create annotation) are added.
    pub fn stamp_self(&self, obj: &mut Value) -> Result<()> {
        let snapshot = self.sanitise(obj);
        self.set_last_applied(obj, &snapshot)
    }

    /// Runs the full three-way merge/apply cycle for an update: reads
    /// `observed`'s last-applied history, sanitises `desired`, merges, and
    /// writes the new last-applied snapshot onto the result.
    pub fn apply(&self, observed: &Value, desired: &Value) -> Result<Value> {
        let last_applied = self.get_last_applied(observed);
        let sanitised_desired = self.sanitise(desired);
        let mut merged = merge::merge(observed, &last_applied, &sanitised_desired)?;
        self.set_last_applied(&mut merged, &sanitised_desired)?;
        Ok(merged)
    }
}
