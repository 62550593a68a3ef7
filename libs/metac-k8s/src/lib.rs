//! The Kubernetes-backed dynamic client adapter: a `kube::Client` wrapped
//! with HTTP metrics, REST path templating for those metrics, and the
//! `metac-core` `DynamicClient`/`DynamicClientFactory` implementation that
//! drives discovery once and resolves `(apiVersion, kind)` lookups from the
//! cached result.

pub mod client;
pub mod dynamic;
pub mod metrics;
pub mod url;

pub use client::new_client_with_metrics;
pub use dynamic::{KubeDynamicClient, KubeDynamicClientFactory};
