//! End-to-end scenario and property tests (spec.md §8) driving the real
//! [`ClusterReconciler`]/[`ResourceReconciler`]/[`Registry`] stack through an
//! in-memory [`FakeDynamicClient`] instead of a live cluster.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::BoxStream;
use metac_core::client::{DeletePrecondition, DynamicClient, DynamicClientFactory, PropagationPolicy, WatchEvent};
use metac_core::cluster::ClusterReconciler;
use metac_core::error::{Error, Result};
use metac_core::reconciler::{ReconcilePolicy, UpdateStrategy};
use metac_core::registry::Registry;
use metac_core::watch::{GroupKind, Watch};
use metac_core::{annotations, UnstructuredExt};
use serde_json::Value;

/// One `(apiVersion, kind)` partition's worth of in-memory state, keyed by
/// name. Records every delete call's precondition/policy so tests can assert
/// on them the way a real cluster's audit log would let you.
#[derive(Default)]
pub struct FakeDynamicClient {
    objects: Mutex<HashMap<String, Value>>,
    deletes: Mutex<Vec<(String, DeletePrecondition, PropagationPolicy)>>,
}

impl FakeDynamicClient {
    pub fn seed(&self, obj: Value) {
        let name = obj.name().unwrap_or_default().to_owned();
        self.objects.lock().unwrap().insert(name, obj);
    }

    pub fn stored(&self, name: &str) -> Option<Value> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> HashSet<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn delete_calls(&self) -> Vec<(String, DeletePrecondition, PropagationPolicy)> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl DynamicClient for FakeDynamicClient {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.objects.lock().unwrap().get(name).cloned())
    }

    async fn create(&self, obj: Value) -> Result<Value> {
        let name = obj.name().unwrap_or_default().to_owned();
        self.objects.lock().unwrap().insert(name, obj.clone());
        Ok(obj)
    }

    async fn update(&self, obj: Value) -> Result<Value> {
        let name = obj.name().unwrap_or_default().to_owned();
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&name) {
            return Err(Error::NotFound(name));
        }
        objects.insert(name, obj.clone());
        Ok(obj)
    }

    async fn update_status(&self, obj: Value) -> Result<Value> {
        self.update(obj).await
    }

    async fn patch(&self, name: &str, patch: Value) -> Result<Value> {
        let mut objects = self.objects.lock().unwrap();
        let current = objects.get(name).cloned().ok_or_else(|| Error::NotFound(name.to_owned()))?;
        let merged = merge_patch(&current, &patch);
        objects.insert(name.to_owned(), merged.clone());
        Ok(merged)
    }

    async fn delete(&self, name: &str, precondition: DeletePrecondition, policy: PropagationPolicy) -> Result<()> {
        self.deletes.lock().unwrap().push((name.to_owned(), precondition.clone(), policy));
        let mut objects = self.objects.lock().unwrap();
        match objects.get(name) {
            None => Err(Error::NotFound(name.to_owned())),
            Some(existing) => {
                if let Some(expected_uid) = &precondition.uid {
                    if existing.uid() != Some(expected_uid.as_str()) {
                        return Err(Error::Conflict(format!("uid precondition failed for {name}")));
                    }
                }
                objects.remove(name);
                Ok(())
            }
        }
    }

    async fn list(&self) -> Result<Vec<Value>> {
        Ok(self.objects.lock().unwrap().values().cloned().collect())
    }

    async fn watch(&self) -> Result<BoxStream<'static, Result<WatchEvent>>> {
        Ok(Box::pin(futures::stream::empty()))
    }
}

/// RFC 7386-style merge patch, good enough for a fake: `null` deletes a key,
/// any other scalar/array replaces, objects recurse.
fn merge_patch(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in patch_map {
                if v.is_null() {
                    merged.remove(k);
                } else {
                    merged.insert(k.clone(), merge_patch(merged.get(k).unwrap_or(&Value::Null), v));
                }
            }
            Value::Object(merged)
        }
        (_, patch) => patch.clone(),
    }
}

struct SharedClient(std::sync::Arc<FakeDynamicClient>);

#[async_trait]
impl DynamicClient for SharedClient {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        self.0.get(name).await
    }
    async fn create(&self, obj: Value) -> Result<Value> {
        self.0.create(obj).await
    }
    async fn update(&self, obj: Value) -> Result<Value> {
        self.0.update(obj).await
    }
    async fn update_status(&self, obj: Value) -> Result<Value> {
        self.0.update_status(obj).await
    }
    async fn patch(&self, name: &str, patch: Value) -> Result<Value> {
        self.0.patch(name, patch).await
    }
    async fn delete(&self, name: &str, precondition: DeletePrecondition, policy: PropagationPolicy) -> Result<()> {
        self.0.delete(name, precondition, policy).await
    }
    async fn list(&self) -> Result<Vec<Value>> {
        self.0.list().await
    }
    async fn watch(&self) -> Result<BoxStream<'static, Result<WatchEvent>>> {
        self.0.watch().await
    }
}

/// Hands out one [`FakeDynamicClient`] per `(apiVersion, kind)`, created
/// lazily on first lookup — mirrors how `KubeDynamicClientFactory` caches
/// discovery results rather than re-resolving every call.
#[derive(Default)]
pub struct FakeDynamicClientFactory {
    clients: Mutex<HashMap<GroupKind, std::sync::Arc<FakeDynamicClient>>>,
}

impl FakeDynamicClientFactory {
    pub fn client_for(&self, group_kind: &GroupKind) -> std::sync::Arc<FakeDynamicClient> {
        self.clients
            .lock()
            .unwrap()
            .entry(group_kind.clone())
            .or_insert_with(|| std::sync::Arc::new(FakeDynamicClient::default()))
            .clone()
    }
}

impl DynamicClientFactory for FakeDynamicClientFactory {
    fn namespace(&self, group_kind: &GroupKind, _namespace: &str) -> Result<Box<dyn DynamicClient>> {
        Ok(Box::new(SharedClient(self.client_for(group_kind))))
    }
}

/// A policy fixed for the lifetime of one test — the knobs a real
/// `CompositeController` spec would otherwise supply.
pub struct TestPolicy {
    pub watch: Watch,
    pub strategy: UpdateStrategy,
    pub is_patch: bool,
    pub update_any: bool,
    pub delete_any: bool,
    pub update_during_pending_delete: bool,
}

impl TestPolicy {
    pub fn new(watch: Watch) -> Self {
        Self {
            watch,
            strategy: UpdateStrategy::InPlace,
            is_patch: false,
            update_any: false,
            delete_any: false,
            update_during_pending_delete: false,
        }
    }
}

impl ReconcilePolicy for TestPolicy {
    fn update_strategy(&self, _group_kind: &GroupKind) -> Result<UpdateStrategy> {
        Ok(self.strategy)
    }
    fn is_patch(&self, _group_kind: &GroupKind) -> bool {
        self.is_patch
    }
    fn watch(&self) -> &Watch {
        &self.watch
    }
    fn is_watch_owner(&self) -> bool {
        true
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
        annotations::DEFAULT_LAST_APPLIED
    }
}

pub fn test_watch(namespace: &str) -> Watch {
    Watch {
        group_kind: GroupKind::new("v1", "Parent"),
        namespace: namespace.to_owned(),
        name: "p1".to_owned(),
        uid: "watch-uid".to_owned(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn end_to_end_create_then_noop_reconcile() {
        let factory = Arc::new(FakeDynamicClientFactory::default());
        let policy = Arc::new(TestPolicy::new(test_watch("ns")));
        let cluster = ClusterReconciler::new(factory.clone(), policy);

        let mut desired = Registry::new();
        desired.insert(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}}));
        let observed = Registry::new();
        let explicit_deletes = HashMap::new();
        let explicit_updates = Registry::new();

        cluster.apply(&observed, &desired, &explicit_deletes, &explicit_updates).await.unwrap();

        let client = factory.client_for(&GroupKind::new("v1", "ConfigMap"));
        let created = client.stored("cm").expect("cm should have been created");
        assert_eq!(created.annotation(annotations::CREATED_DUE_TO_WATCH), Some("watch-uid"));

        // Second reconcile observes exactly what was created; nothing changes.
        let mut observed2 = Registry::new();
        observed2.insert(created);
        cluster.apply(&observed2, &desired, &explicit_deletes, &explicit_updates).await.unwrap();
        assert_eq!(client.names(), HashSet::from(["cm".to_owned()]));
    }

    #[tokio::test]
    async fn s3_update_skipped_during_pending_delete() {
        let factory = Arc::new(FakeDynamicClientFactory::default());
        let policy = Arc::new(TestPolicy::new(test_watch("ns")));
        let cluster = ClusterReconciler::new(factory.clone(), policy);
        let client = factory.client_for(&GroupKind::new("v1", "ConfigMap"));

        let mut observed_obj = json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "cm", "deletionTimestamp": "2024-01-01T00:00:00Z"}
        });
        observed_obj.set_annotation(annotations::CREATED_DUE_TO_WATCH, "watch-uid");
        client.seed(observed_obj.clone());

        let mut observed = Registry::new();
        observed.insert(observed_obj.clone());
        let mut desired = Registry::new();
        desired.insert(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm", "labels": {"a": "1"}}}));

        cluster.apply(&observed, &desired, &HashMap::new(), &Registry::new()).await.unwrap();

        assert_eq!(client.stored("cm").unwrap(), observed_obj, "pending-delete object must be left untouched");
    }

    #[tokio::test]
    async fn s4_recreate_strategy_deletes_with_uid_precondition() {
        let factory = Arc::new(FakeDynamicClientFactory::default());
        let mut policy = TestPolicy::new(test_watch("ns"));
        policy.strategy = UpdateStrategy::Recreate;
        let policy = Arc::new(policy);
        let cluster = ClusterReconciler::new(factory.clone(), policy);
        let client = factory.client_for(&GroupKind::new("v1", "ConfigMap"));

        let mut observed_obj = json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "cm", "uid": "uid-1"}
        });
        observed_obj.set_annotation(annotations::CREATED_DUE_TO_WATCH, "watch-uid");
        client.seed(observed_obj.clone());

        let mut observed = Registry::new();
        observed.insert(observed_obj);
        let mut desired = Registry::new();
        desired.insert(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm", "labels": {"a": "1"}}}));

        cluster.apply(&observed, &desired, &HashMap::new(), &Registry::new()).await.unwrap();

        let calls = client.delete_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "cm");
        assert_eq!(calls[0].1.uid.as_deref(), Some("uid-1"));
        assert_eq!(calls[0].2, PropagationPolicy::Background);
        assert!(client.stored("cm").is_none(), "recreate issues no PUT this cycle");
    }

    #[tokio::test]
    async fn ownership_gating_blocks_foreign_owned_update() {
        let factory = Arc::new(FakeDynamicClientFactory::default());
        let policy = Arc::new(TestPolicy::new(test_watch("ns")));
        let cluster = ClusterReconciler::new(factory.clone(), policy);
        let client = factory.client_for(&GroupKind::new("v1", "ConfigMap"));

        let mut observed_obj = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}});
        observed_obj.set_annotation(annotations::CREATED_DUE_TO_WATCH, "someone-else");
        client.seed(observed_obj.clone());

        let mut observed = Registry::new();
        observed.insert(observed_obj.clone());
        let mut desired = Registry::new();
        desired.insert(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm", "labels": {"a": "1"}}}));

        cluster.apply(&observed, &desired, &HashMap::new(), &Registry::new()).await.unwrap();
        assert_eq!(client.stored("cm").unwrap(), observed_obj, "foreign-owned child must not be mutated without updateAny");
    }

    #[tokio::test]
    async fn phase_ordering_delete_then_create_across_partitions() {
        let factory = Arc::new(FakeDynamicClientFactory::default());
        let policy = Arc::new(TestPolicy::new(test_watch("ns")));
        let cluster = ClusterReconciler::new(factory.clone(), policy);
        let client = factory.client_for(&GroupKind::new("v1", "ConfigMap"));

        let mut stale = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "stale"}});
        stale.set_annotation(annotations::CREATED_DUE_TO_WATCH, "watch-uid");
        client.seed(stale.clone());

        let mut observed = Registry::new();
        observed.insert(stale);
        let mut desired = Registry::new();
        desired.insert(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "fresh"}}));

        cluster.apply(&observed, &desired, &HashMap::new(), &Registry::new()).await.unwrap();

        assert_eq!(client.names(), HashSet::from(["fresh".to_owned()]));
    }

    #[tokio::test]
    async fn explicit_update_and_delete_bypass_ownership_checks() {
        let factory = Arc::new(FakeDynamicClientFactory::default());
        let policy = Arc::new(TestPolicy::new(test_watch("ns")));
        let cluster = ClusterReconciler::new(factory.clone(), policy);
        let client = factory.client_for(&GroupKind::new("v1", "ConfigMap"));

        let mut foreign_a = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}});
        foreign_a.set_annotation(annotations::CREATED_DUE_TO_WATCH, "someone-else");
        client.seed(foreign_a.clone());
        let mut foreign_b = json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "b"}});
        foreign_b.set_annotation(annotations::CREATED_DUE_TO_WATCH, "someone-else");
        client.seed(foreign_b.clone());

        let mut observed = Registry::new();
        observed.insert(foreign_a);
        observed.insert(foreign_b);

        let mut explicit_updates = Registry::new();
        explicit_updates.insert(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a", "labels": {"x": "1"}}}));

        let mut explicit_deletes = HashMap::new();
        explicit_deletes.insert(GroupKind::new("v1", "ConfigMap"), HashSet::from(["b".to_owned()]));

        cluster
            .apply(&observed, &Registry::new(), &explicit_deletes, &explicit_updates)
            .await
            .unwrap();

        assert_eq!(client.stored("a").unwrap().pointer("/metadata/labels/x").unwrap(), "1");
        assert!(client.stored("b").is_none());
    }
}
