//! Well-known annotation keys the engine reads and writes on children
//! (spec.md §3 "Apply context" and §6 "Annotation keys").
//!
//! The create/update annotations are scoped by watch UID so that multiple
//! independent controllers can coexist on the same object — see spec.md §9
//! "Owner and update annotations under concurrency". This is deliberate and
//! must not be collapsed into a single shared key.

/// Records which watch originally created this object. Set once, at create
/// time, and never overwritten afterwards.
pub const CREATED_DUE_TO_WATCH: &str = "metac.openebs.io/created-due-to-watch";

/// Default annotation metac stamps with the sanitised last-applied snapshot
/// when the caller does not supply a per-watch key.
pub const DEFAULT_LAST_APPLIED: &str = "metac.openebs.io/last-applied-configuration";

/// Builds the per-watch "last updated by" annotation key.
pub fn updated_due_to_watch_key(watch_uid: &str) -> String {
    format!("{watch_uid}/updated-due-to-watch")
}

/// Builds the per-watch last-applied snapshot annotation key.
pub fn last_applied_key(watch_uid: &str) -> String {
    format!("{watch_uid}/gctl-last-applied")
}
