//! The binary's own error type — wraps `metac-core`'s reconcile errors
//! alongside the transport/IO failures that only exist at this layer
//! (webhook HTTP calls, cluster discovery), so `reconcile`'s `?` works
//! across both without the engine knowing about `reqwest` or `kube`.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] metac_core::Error),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("invalid input: {0}")]
    UserInput(String),
}
