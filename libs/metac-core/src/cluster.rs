//! The cluster reconciler (spec.md §4.5, C5): fans a reconcile out across
//! every `(apiVersion, kind)` partition touched by the registries, acquiring
//! one [`DynamicClient`] per partition and running the fixed phase order
//! (spec.md §4.4 "Apply ordering").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::client::{DynamicClient, DynamicClientFactory};
use crate::error::Error;
use crate::reconciler::{ReconcilePolicy, ResourceReconciler};
use crate::registry::Registry;
use crate::watch::GroupKind;

/// Orchestrates one reconcile's worth of [`ResourceReconciler`]s, one per
/// `(apiVersion, kind)` partition that appears in any input registry.
pub struct ClusterReconciler {
    factory: Arc<dyn DynamicClientFactory>,
    policy: Arc<dyn ReconcilePolicy>,
}

impl ClusterReconciler {
    pub fn new(factory: Arc<dyn DynamicClientFactory>, policy: Arc<dyn ReconcilePolicy>) -> Self {
        Self { factory, policy }
    }

    /// Runs delete → create-or-update → explicit-update → explicit-delete in
    /// that order. Errors from every phase and every partition are collected
    /// into a single aggregate rather than short-circuiting (spec.md §4.4).
    pub async fn apply(
        &self,
        observed: &Registry,
        desired: &Registry,
        explicit_deletes: &HashMap<GroupKind, HashSet<String>>,
        explicit_updates: &Registry,
    ) -> crate::error::Result<()> {
        let namespace = self.policy.watch().namespace.clone();
        let mut errors = Vec::new();

        let mut all_group_kinds: HashSet<GroupKind> = HashSet::new();
        all_group_kinds.extend(observed.group_kinds().cloned());
        all_group_kinds.extend(desired.group_kinds().cloned());
        all_group_kinds.extend(explicit_deletes.keys().cloned());
        all_group_kinds.extend(explicit_updates.group_kinds().cloned());

        let mut clients: HashMap<GroupKind, Arc<dyn DynamicClient>> = HashMap::new();
        for group_kind in &all_group_kinds {
            match self.factory.namespace(group_kind, &namespace) {
                Ok(client) => {
                    clients.insert(group_kind.clone(), Arc::from(client));
                }
                Err(e) => errors.push(e),
            }
        }

        let build = |group_kind: &GroupKind| -> Option<ResourceReconciler> {
            let client = clients.get(group_kind)?.clone();
            Some(
                ResourceReconciler::new(group_kind.clone(), client, self.policy.clone())
                    .with_observed(observed.partition(group_kind).cloned().unwrap_or_default())
                    .with_desired(desired.partition(group_kind).cloned().unwrap_or_default())
                    .with_explicit_deletes(explicit_deletes.get(group_kind).cloned().unwrap_or_default())
                    .with_explicit_updates(explicit_updates.partition(group_kind).cloned().unwrap_or_default()),
            )
        };

        // Phase 1: delete — only (apiVersion, kind) pairs actually observed
        // can have anything to delete.
        for group_kind in observed.group_kinds() {
            if let Some(reconciler) = build(group_kind) {
                errors.extend(reconciler.delete().await);
            }
        }

        // Phase 2: create-or-update — driven by what's desired.
        for group_kind in desired.group_kinds() {
            if let Some(reconciler) = build(group_kind) {
                errors.extend(reconciler.create().await);
                errors.extend(reconciler.update().await);
            }
        }

        // Phase 3: explicit-update — omit partitions with nothing observed.
        for group_kind in explicit_updates.group_kinds() {
            if observed.partition(group_kind).is_none() {
                continue;
            }
            if let Some(reconciler) = build(group_kind) {
                errors.extend(reconciler.explicit_update().await);
            }
        }

        // Phase 4: explicit-delete.
        for group_kind in explicit_deletes.keys() {
            if let Some(reconciler) = build(group_kind) {
                errors.extend(reconciler.explicit_delete().await);
            }
        }

        match Error::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
