//! The reconciliation engine: a three-way merge/apply core, an object
//! registry, a selector evaluator, and the resource/cluster reconcilers that
//! drive a dynamic client adapter through a fixed phase order.

pub mod annotations;
pub mod apply;
pub mod client;
pub mod cluster;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod reconciler;
pub mod registry;
pub mod selector;
pub mod telemetry;
pub mod unstructured;
pub mod watch;
pub mod webhook;

pub use error::{Error, Result};
pub use registry::Registry;
pub use unstructured::UnstructuredExt;
pub use watch::{GroupKind, Watch};
