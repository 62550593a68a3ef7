//! The concrete [`DynamicClient`]/[`DynamicClientFactory`] pair backed by
//! `kube::Api<DynamicObject>`. `metac-core`'s reconcilers never see a typed
//! object, so every payload crosses the boundary as `serde_json::Value`.
//!
//! Discovery is the one place this adapter cannot honor the trait's sync
//! signature directly: resolving a `GroupKind` into an `ApiResource` needs a
//! round-trip to the apiserver. [`KubeDynamicClientFactory::discover`] pays
//! that cost once, up front, and caches the result; `namespace()` then does
//! a plain map lookup.

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, Preconditions, PropagationPolicy as KubePropagationPolicy, WatchParams};
use kube::core::DynamicObject;
use kube::discovery::Discovery;
use kube::{Api, Client};
use metac_core::client::{DeletePrecondition, DynamicClient, DynamicClientFactory, PropagationPolicy, WatchEvent};
use metac_core::error::{Error, Result};
use metac_core::watch::GroupKind;
use serde_json::Value;

/// Runs discovery once and hands out an [`Api<DynamicObject>`] per
/// `(GroupKind, namespace)` partition.
pub struct KubeDynamicClientFactory {
    client: Client,
    discovery: Discovery,
}

impl KubeDynamicClientFactory {
    pub async fn discover(client: Client) -> kube::Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }
}

impl DynamicClientFactory for KubeDynamicClientFactory {
    fn namespace(&self, group_kind: &GroupKind, namespace: &str) -> Result<Box<dyn DynamicClient>> {
        let gvk = to_gvk(group_kind);
        let (ar, caps) = self
            .discovery
            .resolve_gvk(&gvk)
            .ok_or_else(|| Error::Discovery {
                group_kind: group_kind.to_string(),
            })?;

        let api = if caps.scope == kube::discovery::Scope::Namespaced && !namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        };

        Ok(Box::new(KubeDynamicClient { api }))
    }
}

fn to_gvk(group_kind: &GroupKind) -> kube::core::GroupVersionKind {
    let (group, version) = match group_kind.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", group_kind.api_version.as_str()),
    };
    kube::core::GroupVersionKind::gvk(group, version, &group_kind.kind)
}

/// One `Api<DynamicObject>`, scoped by discovery to a single `(GroupKind,
/// namespace)` — exactly the granularity [`DynamicClientFactory::namespace`]
/// hands out.
pub struct KubeDynamicClient {
    api: Api<DynamicObject>,
}

#[async_trait]
impl DynamicClient for KubeDynamicClient {
    async fn get(&self, name: &str) -> Result<Option<Value>> {
        match self.api.get_opt(name).await.map_err(map_err)? {
            Some(obj) => Ok(Some(to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, obj: Value) -> Result<Value> {
        let dynamic_obj = from_value(obj)?;
        let created = self.api.create(&Default::default(), &dynamic_obj).await.map_err(map_err)?;
        to_value(created)
    }

    async fn update(&self, obj: Value) -> Result<Value> {
        let dynamic_obj = from_value(obj)?;
        let name = dynamic_obj.metadata.name.clone().ok_or_else(|| Error::Configuration("update target has no name".to_owned()))?;
        let updated = self.api.replace(&name, &Default::default(), &dynamic_obj).await.map_err(map_err)?;
        to_value(updated)
    }

    async fn update_status(&self, obj: Value) -> Result<Value> {
        let dynamic_obj = from_value(obj)?;
        let name = dynamic_obj.metadata.name.clone().ok_or_else(|| Error::Configuration("update_status target has no name".to_owned()))?;
        let body = serde_json::to_vec(&dynamic_obj).map_err(|e| Error::Apply(e.to_string()))?;
        let updated = self.api.replace_status(&name, &Default::default(), body).await.map_err(map_err)?;
        to_value(updated)
    }

    async fn patch(&self, name: &str, patch: Value) -> Result<Value> {
        let patched = self
            .api
            .patch(name, &PatchParams::apply("metac"), &Patch::Merge(patch))
            .await
            .map_err(map_err)?;
        to_value(patched)
    }

    async fn delete(&self, name: &str, precondition: DeletePrecondition, policy: PropagationPolicy) -> Result<()> {
        let params = DeleteParams {
            preconditions: precondition.uid.map(|uid| Preconditions {
                uid: Some(uid),
                resource_version: None,
            }),
            propagation_policy: Some(map_policy(policy)),
            ..Default::default()
        };
        match self.api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let e = map_err(e);
                if e.is_not_found() {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn list(&self) -> Result<Vec<Value>> {
        let list = self.api.list(&ListParams::default()).await.map_err(map_err)?;
        list.items.into_iter().map(to_value).collect()
    }

    async fn watch(&self) -> Result<futures::stream::BoxStream<'static, Result<WatchEvent>>> {
        let stream = self.api.watch(&WatchParams::default(), "0").await.map_err(map_err)?;
        let mapped = stream.filter_map(|event| async move { map_watch_event(event) });
        Ok(Box::pin(mapped))
    }
}

fn map_watch_event(event: kube::Result<kube::api::WatchEvent<DynamicObject>>) -> Option<Result<WatchEvent>> {
    match event {
        Ok(kube::api::WatchEvent::Added(obj)) => Some(to_value(obj).map(WatchEvent::Added)),
        Ok(kube::api::WatchEvent::Modified(obj)) => Some(to_value(obj).map(WatchEvent::Modified)),
        Ok(kube::api::WatchEvent::Deleted(obj)) => Some(to_value(obj).map(WatchEvent::Deleted)),
        Ok(kube::api::WatchEvent::Bookmark(_)) => None,
        Ok(kube::api::WatchEvent::Error(e)) => Some(Err(map_err(kube::Error::Api(e)))),
        Err(e) => Some(Err(map_err(e))),
    }
}

fn map_policy(policy: PropagationPolicy) -> KubePropagationPolicy {
    match policy {
        PropagationPolicy::Background => KubePropagationPolicy::Background,
        PropagationPolicy::Foreground => KubePropagationPolicy::Foreground,
        PropagationPolicy::Orphan => KubePropagationPolicy::Orphan,
    }
}

fn map_err(e: kube::Error) -> Error {
    if let kube::Error::Api(resp) = &e {
        match resp.code {
            404 => return Error::NotFound(resp.message.clone()),
            409 => return Error::Conflict(resp.message.clone()),
            _ => {}
        }
    }
    Error::Apply(e.to_string())
}

fn to_value(obj: DynamicObject) -> Result<Value> {
    serde_json::to_value(obj).map_err(|e| Error::Apply(e.to_string()))
}

fn from_value(obj: Value) -> Result<DynamicObject> {
    serde_json::from_value(obj).map_err(|e| Error::Apply(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn to_gvk_splits_group_from_api_version() {
        let gk = GroupKind::new("apps/v1", "Deployment");
        let gvk = to_gvk(&gk);
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");
    }

    #[test]
    fn to_gvk_treats_bare_version_as_core_group() {
        let gk = GroupKind::new("v1", "Pod");
        let gvk = to_gvk(&gk);
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
    }

    #[test]
    fn propagation_policy_maps_one_to_one() {
        assert!(matches!(map_policy(PropagationPolicy::Background), KubePropagationPolicy::Background));
        assert!(matches!(map_policy(PropagationPolicy::Foreground), KubePropagationPolicy::Foreground));
        assert!(matches!(map_policy(PropagationPolicy::Orphan), KubePropagationPolicy::Orphan));
    }
}
