//! The dynamic client adapter contract (spec.md §4.7/§6, C7): the engine
//! talks to a cluster only through this trait, scoped to a single
//! `(GroupKind, namespace)` per instance.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::watch::GroupKind;

/// What to check before a delete is allowed to proceed — mirrors the
/// Kubernetes delete-options UID precondition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletePrecondition {
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationPolicy {
    Background,
    Foreground,
    Orphan,
}

#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(Value),
    Modified(Value),
    Deleted(Value),
}

/// A client scoped to one `(apiVersion, kind)` and namespace. Every method
/// operates on unstructured JSON; there is no typed object model (spec.md
/// §3's own design note).
#[async_trait]
pub trait DynamicClient: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Value>>;

    async fn create(&self, obj: Value) -> Result<Value>;

    async fn update(&self, obj: Value) -> Result<Value>;

    async fn update_status(&self, obj: Value) -> Result<Value>;

    async fn patch(&self, name: &str, patch: Value) -> Result<Value>;

    async fn delete(&self, name: &str, precondition: DeletePrecondition, policy: PropagationPolicy) -> Result<()>;

    async fn list(&self) -> Result<Vec<Value>>;

    async fn watch(&self) -> Result<BoxStream<'static, Result<WatchEvent>>>;
}

/// Acquires a [`DynamicClient`] for a `(GroupKind, namespace)` partition.
/// Implementations typically cache per-resource discovery internally.
pub trait DynamicClientFactory: Send + Sync {
    fn namespace(&self, group_kind: &GroupKind, namespace: &str) -> Result<Box<dyn DynamicClient>>;
}

/// Exponential backoff schedule for [`atomic_update`] — doubling, capped.
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: usize,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

/// Re-reads `name`, applies `mutate`, and writes it back, retrying on
/// `Error::Conflict` with exponential backoff. Bails with `Error::NotFound`
/// if the live object disappears or its UID diverges from the one `mutate`
/// was last handed — the object was deleted and recreated out from under
/// this loop, so there is nothing sensible left to merge against.
pub async fn atomic_update<F>(client: &dyn DynamicClient, name: &str, mut mutate: F, schedule: RetrySchedule) -> Result<Value>
where
    F: FnMut(Value) -> Result<Value> + Send,
{
    let mut delay = schedule.initial;
    let mut last_uid: Option<String> = None;

    for attempt in 0..schedule.max_attempts {
        let current = client
            .get(name)
            .await?
            .ok_or_else(|| Error::NotFound(name.to_owned()))?;

        if let Some(expected) = &last_uid {
            let current_uid = current.get("metadata").and_then(|m| m.get("uid")).and_then(|v| v.as_str());
            if current_uid != Some(expected.as_str()) {
                return Err(Error::NotFound(format!("{name} was replaced during atomic update")));
            }
        }
        last_uid = current.get("metadata").and_then(|m| m.get("uid")).and_then(|v| v.as_str()).map(str::to_owned);

        let mutated = mutate(current)?;
        match client.update(mutated).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() && attempt + 1 < schedule.max_attempts => {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(schedule.max);
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Conflict(format!("{name} did not converge after {} attempts", schedule.max_attempts)))
}

/// Adds `finalizer` to `obj`'s finalizer list via [`atomic_update`] if not
/// already present; a no-op update is skipped.
pub async fn add_finalizer(client: &dyn DynamicClient, name: &str, finalizer: &str, schedule: RetrySchedule) -> Result<Value> {
    use crate::unstructured::UnstructuredExt;
    atomic_update(
        client,
        name,
        |mut obj| {
            let mut finalizers = obj.finalizers();
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_owned());
                obj.set_finalizers(finalizers);
            }
            Ok(obj)
        },
        schedule,
    )
    .await
}

/// Removes `finalizer` from `obj`'s finalizer list via [`atomic_update`].
pub async fn remove_finalizer(client: &dyn DynamicClient, name: &str, finalizer: &str, schedule: RetrySchedule) -> Result<Value> {
    use crate::unstructured::UnstructuredExt;
    atomic_update(
        client,
        name,
        |mut obj| {
            let finalizers: Vec<String> = obj.finalizers().into_iter().filter(|f| f != finalizer).collect();
            obj.set_finalizers(finalizers);
            Ok(obj)
        },
        schedule,
    )
    .await
}
