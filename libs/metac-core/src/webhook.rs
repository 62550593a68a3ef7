//! Webhook sync protocol types (spec.md §6, §4.8): the shapes the upper
//! layer POSTs to and parses back from the user's webhook URL. Dispatch and
//! resync scheduling live above `metac-core`; this module only owns the
//! wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::watch::Watch;

/// What the controller sends the user's webhook: the parent and its
/// currently-observed attachments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub parent: Value,
    #[serde(default)]
    pub attachments: Vec<Value>,
    #[serde(default)]
    pub finalizing: bool,
}

impl SyncRequest {
    pub fn new(parent: Value, attachments: Vec<Value>) -> Self {
        Self {
            parent,
            attachments,
            finalizing: false,
        }
    }
}

/// What the user's webhook is expected to return: the desired attachment
/// set (accepted under either field name, per spec.md §6) plus a status
/// patch and an optional resync delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    #[serde(default, alias = "children")]
    pub attachments: Vec<Value>,

    #[serde(default)]
    pub status: Value,

    #[serde(default, rename = "resyncAfterSeconds", skip_serializing_if = "Option::is_none")]
    pub resync_after_seconds: Option<f64>,
}

impl SyncResponse {
    /// A non-negative resync delay, or `None` if absent/invalid — a negative
    /// value is a malformed response, not a "no resync" signal.
    pub fn resync_delay(&self) -> Option<f64> {
        self.resync_after_seconds.filter(|secs| *secs >= 0.0)
    }
}

/// Identifies which watch a [`SyncRequest`]/[`SyncResponse`] pair belongs to
/// — not serialized onto the wire, but threaded alongside it by the caller
/// so responses can be routed back to the right reconcile.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub watch: Watch,
}
