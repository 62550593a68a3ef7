//! The watch/parent resource (GLOSSARY) and the group-kind key the registry
//! and policy lookups are keyed by (spec.md §3).

use std::fmt;

use serde_json::Value;

use crate::unstructured::UnstructuredExt;

/// `(apiVersion, kind)`, compared and hashed as a pair so `"v1"`/`"Pod"` and
/// `"apps/v1"`/`"Pod"` never collide. The registry's group key's string form
/// must be unique, so `Display` is the canonical serialization used there.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKind {
    pub api_version: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    pub fn of(obj: &Value) -> Option<Self> {
        Some(Self::new(obj.api_version()?, obj.kind()?))
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version, self.kind)
    }
}

/// The parent/watch resource that triggered a reconcile. Only the subset of
/// metadata the engine actually consumes is modelled here; scheduling
/// bookkeeping (resourceVersion, generation) belongs to the upper layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    pub group_kind: GroupKind,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl Watch {
    /// Builds a `Watch` from the observed parent object. Returns `None` if
    /// the object is missing apiVersion/kind/uid — those are non-negotiable
    /// for a watch to scope annotations and own children.
    pub fn from_object(obj: &Value) -> Option<Self> {
        Some(Self {
            group_kind: GroupKind::of(obj)?,
            namespace: obj.namespace().unwrap_or_default().to_owned(),
            name: obj.name().unwrap_or_default().to_owned(),
            uid: obj.uid()?.to_owned(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_kind_display_is_unique_string_form() {
        let a = GroupKind::new("v1", "Pod");
        let b = GroupKind::new("apps/v1", "Pod");
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn watch_from_object_requires_uid() {
        let obj = json!({"apiVersion": "v1", "kind": "MyParent", "metadata": {"name": "p"}});
        assert!(Watch::from_object(&obj).is_none());
    }

    #[test]
    fn watch_from_object_succeeds() {
        let obj = json!({
            "apiVersion": "v1", "kind": "MyParent",
            "metadata": {"name": "p", "namespace": "ns", "uid": "u1"}
        });
        let watch = Watch::from_object(&obj).unwrap();
        assert_eq!(watch.namespace, "ns");
        assert_eq!(watch.uid, "u1");
    }
}
