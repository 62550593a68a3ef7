//! The resource reconciler (spec.md §4.4, C4): one instance per
//! `(apiVersion, kind)`, deciding create/update/delete for every name in its
//! observed/desired/explicit maps and carrying those decisions out through a
//! [`DynamicClient`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::annotations;
use crate::apply::ApplyContext;
use crate::client::{DeletePrecondition, DynamicClient, PropagationPolicy};
use crate::error::{Error, Result};
use crate::merge;
use crate::unstructured::UnstructuredExt;
use crate::watch::{GroupKind, Watch};

/// How an update to an existing child is carried out (spec.md §4.4 guard c).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    OnDelete,
    Recreate,
    RollingRecreate,
    InPlace,
    RollingInPlace,
}

/// The policy knobs a [`ResourceReconciler`] consults but does not own —
/// supplied by the caller (typically derived from a `CompositeController`'s
/// spec), shared read-only across every `(apiVersion, kind)` partition of one
/// reconcile (spec.md §4.4).
pub trait ReconcilePolicy: Send + Sync {
    fn update_strategy(&self, group_kind: &GroupKind) -> Result<UpdateStrategy>;
    fn is_patch(&self, group_kind: &GroupKind) -> bool;
    fn watch(&self) -> &Watch;
    fn is_watch_owner(&self) -> bool;
    fn update_any(&self) -> bool;
    fn delete_any(&self) -> bool;
    fn update_during_pending_delete(&self) -> bool;
    fn last_applied_key(&self) -> &str;
}

/// One `(apiVersion, kind)` partition's worth of reconcile state.
pub struct ResourceReconciler {
    group_kind: GroupKind,
    client: Arc<dyn DynamicClient>,
    policy: Arc<dyn ReconcilePolicy>,
    observed: HashMap<String, Value>,
    desired: HashMap<String, Value>,
    explicit_deletes: HashSet<String>,
    explicit_updates: HashMap<String, Value>,
}

impl ResourceReconciler {
    pub fn new(group_kind: GroupKind, client: Arc<dyn DynamicClient>, policy: Arc<dyn ReconcilePolicy>) -> Self {
        Self {
            group_kind,
            client,
            policy,
            observed: HashMap::new(),
            desired: HashMap::new(),
            explicit_deletes: HashSet::new(),
            explicit_updates: HashMap::new(),
        }
    }

    pub fn with_observed(mut self, observed: HashMap<String, Value>) -> Self {
        self.observed = observed;
        self
    }

    pub fn with_desired(mut self, desired: HashMap<String, Value>) -> Self {
        self.desired = desired;
        self
    }

    pub fn with_explicit_deletes(mut self, explicit_deletes: HashSet<String>) -> Self {
        self.explicit_deletes = explicit_deletes;
        self
    }

    pub fn with_explicit_updates(mut self, explicit_updates: HashMap<String, Value>) -> Self {
        self.explicit_updates = explicit_updates;
        self
    }

    /// Names present in `desired` but not `observed`.
    pub async fn create(&self) -> Vec<Error> {
        let mut errors = Vec::new();
        for (name, desired_obj) in &self.desired {
            if self.observed.contains_key(name) {
                continue;
            }
            if let Err(e) = self.create_one(desired_obj).await {
                errors.push(e);
            }
        }
        errors
    }

    /// Names present in both `desired` and `observed`.
    pub async fn update(&self) -> Vec<Error> {
        let mut errors = Vec::new();
        for (name, desired_obj) in &self.desired {
            let Some(observed_obj) = self.observed.get(name) else { continue };
            if let Err(e) = self.update_one(observed_obj, desired_obj, self.policy.update_any()).await {
                errors.push(e);
            }
        }
        errors
    }

    /// Names present in `observed` but not `desired`.
    pub async fn delete(&self) -> Vec<Error> {
        let mut errors = Vec::new();
        for (name, observed_obj) in &self.observed {
            if self.desired.contains_key(name) {
                continue;
            }
            if let Err(e) = self.delete_one(observed_obj, self.policy.delete_any()).await {
                errors.push(e);
            }
        }
        errors
    }

    /// `explicitUpdates` intersected with `observed`, `updateAny` forced.
    pub async fn explicit_update(&self) -> Vec<Error> {
        let mut errors = Vec::new();
        for (name, desired_obj) in &self.explicit_updates {
            let Some(observed_obj) = self.observed.get(name) else { continue };
            if let Err(e) = self.update_one(observed_obj, desired_obj, true).await {
                errors.push(e);
            }
        }
        errors
    }

    /// `observed` filtered by membership in `explicitDeletes`, `deleteAny` bypassed.
    pub async fn explicit_delete(&self) -> Vec<Error> {
        let mut errors = Vec::new();
        for name in &self.explicit_deletes {
            let Some(observed_obj) = self.observed.get(name) else { continue };
            if let Err(e) = self.delete_one(observed_obj, true).await {
                errors.push(e);
            }
        }
        errors
    }

    async fn create_one(&self, desired_obj: &Value) -> Result<Value> {
        let watch = self.policy.watch();
        let apply_ctx = ApplyContext::new(self.policy.last_applied_key());

        let mut child = desired_obj.clone();
        apply_ctx.stamp_self(&mut child)?;
        child.set_annotation(annotations::CREATED_DUE_TO_WATCH, watch.uid.clone());
        if self.policy.is_watch_owner() {
            child.push_owner_reference(json!({
                "apiVersion": watch.group_kind.api_version,
                "kind": watch.group_kind.kind,
                "name": watch.name,
                "uid": watch.uid,
                "controller": true,
                "blockOwnerDeletion": true,
            }));
        }

        let namespace = match child.namespace() {
            Some(ns) if !ns.is_empty() => ns.to_owned(),
            _ => watch.namespace.clone(),
        };
        if !namespace.is_empty() {
            child["metadata"]["namespace"] = json!(namespace);
        }

        self.client.create(child).await
    }

    async fn update_one(&self, observed_obj: &Value, desired_obj: &Value, update_any: bool) -> Result<()> {
        // guard a
        if observed_obj.deletion_timestamp().is_some() && !self.policy.update_during_pending_delete() {
            return Ok(());
        }
        // guard b
        let watch = self.policy.watch();
        let created_by_watch = observed_obj.annotation(annotations::CREATED_DUE_TO_WATCH);
        if created_by_watch != Some(watch.uid.as_str()) && !update_any {
            return Ok(());
        }
        // guard c
        let strategy = self.policy.update_strategy(&self.group_kind)?;
        if strategy == UpdateStrategy::OnDelete {
            return Ok(());
        }

        let apply_ctx = ApplyContext::new(self.policy.last_applied_key());
        let mut merge_source = observed_obj.clone();
        // guard d
        if self.policy.is_patch(&self.group_kind) {
            let sanitised_observed = apply_ctx.sanitise(&merge_source);
            apply_ctx.set_last_applied(&mut merge_source, &sanitised_observed)?;
        }

        // guard e
        let merged = apply_ctx.apply(&merge_source, desired_obj)?;
        if !merge::has_merge_diff(&merged, observed_obj) {
            return Ok(());
        }

        let name = observed_obj.name().unwrap_or_default();
        let uid = observed_obj.uid().map(str::to_owned);

        match strategy {
            // guard f
            UpdateStrategy::Recreate | UpdateStrategy::RollingRecreate => {
                self.delete_ignoring_not_found(name, uid).await
            }
            // guard g
            UpdateStrategy::InPlace | UpdateStrategy::RollingInPlace => {
                let mut to_put = merged;
                let key = annotations::updated_due_to_watch_key(&watch.uid);
                to_put.set_annotation(&key, watch.name.clone());
                self.client.update(to_put).await.map(|_| ())
            }
            UpdateStrategy::OnDelete => unreachable!("handled by guard c"),
        }
    }

    async fn delete_one(&self, observed_obj: &Value, delete_any: bool) -> Result<()> {
        // guard a
        if observed_obj.deletion_timestamp().is_some() {
            return Ok(());
        }
        // guard b
        let watch = self.policy.watch();
        let owner = observed_obj.annotation(annotations::CREATED_DUE_TO_WATCH);
        if owner != Some(watch.uid.as_str()) && !delete_any {
            return Ok(());
        }
        // guard c
        let name = observed_obj.name().unwrap_or_default();
        let uid = observed_obj.uid().map(str::to_owned);
        self.delete_ignoring_not_found(name, uid).await
    }

    async fn delete_ignoring_not_found(&self, name: &str, uid: Option<String>) -> Result<()> {
        match self
            .client
            .delete(name, DeletePrecondition { uid }, PropagationPolicy::Background)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
