//! Error taxonomy for the reconciliation engine (spec.md §7).
//!
//! Each reconcile phase collects its own errors rather than bailing on the
//! first one; [`Error::Aggregate`] is how a caller gets all of them back
//! together, the way `NewAggregate` merges errors in the source system.

/// All errors the reconciliation engine can produce.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A discovered resource's `(apiVersion, kind)` has no registered client.
    #[error("no dynamic client for {group_kind}")]
    Discovery { group_kind: String },

    /// The three-way merge could not reconcile the shapes of two JSON nodes
    /// at `path` (e.g. a map in `observed` against an array in `desired`).
    #[error("merge error at {path}: {reason}")]
    Merge { path: String, reason: String },

    /// A REST-shaped failure surfaced by a [`crate::client::DynamicClient`].
    #[error("apply error: {0}")]
    Apply(String),

    /// The live object was modified concurrently; the caller should retry.
    #[error("conflict updating {0}")]
    Conflict(String),

    /// The object no longer exists (the dynamic client's `NotFound`).
    #[error("not found: {0}")]
    NotFound(String),

    /// An invalid update strategy, or a selector term with an empty key.
    #[error("policy error: {0}")]
    Policy(String),

    /// Missing watch, missing dynamic client, or similar setup failure that
    /// means the reconcile cannot even begin.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One or more of the above, collected from independent partitions or
    /// phases that do not short-circuit each other.
    #[error("{} error(s) during reconcile: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Short, stable label safe to use as a metrics dimension — mirrors the
    /// low-cardinality label the teacher derives per failure in
    /// `ReconcileMetrics::set_failure`.
    pub fn metric_label(&self) -> String {
        match self {
            Error::Discovery { .. } => "discovery".to_owned(),
            Error::Merge { .. } => "merge".to_owned(),
            Error::Apply(_) => "apply".to_owned(),
            Error::Conflict(_) => "conflict".to_owned(),
            Error::NotFound(_) => "not_found".to_owned(),
            Error::Policy(_) => "policy".to_owned(),
            Error::Configuration(_) => "configuration".to_owned(),
            Error::Aggregate(_) => "aggregate".to_owned(),
        }
    }

    /// True for the sentinel the dynamic client adapter and `AtomicUpdate`
    /// loop treat as a successful delete / terminal retry condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Folds a batch of fallible phase results into a single aggregate,
    /// dropping the `Aggregate` wrapper entirely when there is nothing (or
    /// exactly one thing) to report — callers should not have to special-case
    /// the zero/one-error cases.
    pub fn aggregate(errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.into_iter().next(),
            _ => Some(Error::Aggregate(errors)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
