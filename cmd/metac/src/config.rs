//! Controller configuration: the TOML document that tells the binary which
//! child resources a watch manages and how to reconcile them (spec.md §6's
//! CompositeController equivalent), loaded once at startup.

use std::collections::HashMap;

use metac_core::reconciler::{ReconcilePolicy, UpdateStrategy};
use metac_core::selector::SelectorTermList;
use metac_core::watch::{GroupKind, Watch};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_resync_period")]
    pub resync_period_seconds: u64,

    /// Whether children not annotated as created-by-this-watch may still be
    /// updated/deleted — the escape hatch for adopting pre-existing objects.
    #[serde(default)]
    pub update_any: bool,
    #[serde(default)]
    pub delete_any: bool,
    #[serde(default)]
    pub update_during_pending_delete: bool,
    #[serde(default = "default_true")]
    pub watch_owner: bool,

    pub children: Vec<ChildResourceConfig>,
}

fn default_resync_period() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl ControllerConfig {
    pub fn policy_for(&self, watch: Watch) -> ConfigPolicy {
        ConfigPolicy {
            watch,
            children: self.children.iter().map(|c| (c.group_kind(), c.clone())).collect(),
            update_any: self.update_any,
            delete_any: self.delete_any,
            update_during_pending_delete: self.update_during_pending_delete,
            watch_owner: self.watch_owner,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChildResourceConfig {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub update_strategy: ConfigUpdateStrategy,
    #[serde(default)]
    pub patch: bool,
    /// Gates which objects listed for this kind qualify as attachments
    /// before ownership is even considered; an empty list matches everything.
    #[serde(default)]
    pub selector: SelectorTermList,
}

impl ChildResourceConfig {
    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(self.api_version.clone(), self.kind.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConfigUpdateStrategy {
    OnDelete,
    Recreate,
    RollingRecreate,
    #[default]
    InPlace,
    RollingInPlace,
}

impl From<ConfigUpdateStrategy> for UpdateStrategy {
    fn from(value: ConfigUpdateStrategy) -> Self {
        match value {
            ConfigUpdateStrategy::OnDelete => UpdateStrategy::OnDelete,
            ConfigUpdateStrategy::Recreate => UpdateStrategy::Recreate,
            ConfigUpdateStrategy::RollingRecreate => UpdateStrategy::RollingRecreate,
            ConfigUpdateStrategy::InPlace => UpdateStrategy::InPlace,
            ConfigUpdateStrategy::RollingInPlace => UpdateStrategy::RollingInPlace,
        }
    }
}

/// A [`ReconcilePolicy`] built from [`ControllerConfig`] for a single watch.
pub struct ConfigPolicy {
    watch: Watch,
    children: HashMap<GroupKind, ChildResourceConfig>,
    update_any: bool,
    delete_any: bool,
    update_during_pending_delete: bool,
    watch_owner: bool,
}

impl ReconcilePolicy for ConfigPolicy {
    fn update_strategy(&self, group_kind: &GroupKind) -> metac_core::Result<UpdateStrategy> {
        Ok(self
            .children
            .get(group_kind)
            .map(|c| c.update_strategy.into())
            .unwrap_or(UpdateStrategy::InPlace))
    }

    fn is_patch(&self, group_kind: &GroupKind) -> bool {
        self.children.get(group_kind).map(|c| c.patch).unwrap_or(false)
    }

    fn watch(&self) -> &Watch {
        &self.watch
    }

    fn is_watch_owner(&self) -> bool {
        self.watch_owner
    }

    fn update_any(&self) -> bool {
        self.update_any
    }

    fn delete_any(&self) -> bool {
        self.delete_any
    }

    fn update_during_pending_delete(&self) -> bool {
        self.update_during_pending_delete
    }

    fn last_applied_key(&self) -> &str {
        metac_core::annotations::DEFAULT_LAST_APPLIED
    }
}
