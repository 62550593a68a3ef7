//! Logging and distributed-tracing setup (ambient stack, spec.md §5/§6).
//!
//! Kept dependency-light on purpose: `metac-core` owns initialization so the
//! binary, the `metac-k8s` adapter, and every test crate log through the
//! same subscriber, but this module has no opinion on how its `LogFormat` is
//! parsed from the command line — that's `cmd/metac`'s job.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use opentelemetry::trace::{TraceError, TraceId, TracerProvider};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self, RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use thiserror::Error;
use tracing::dispatcher::SetGlobalDefaultError;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Errors that can occur during tracing initialization.
#[derive(Error, Debug)]
pub enum Error {
    #[error("TraceError: {0}")]
    TraceError(#[source] TraceError),

    #[error("SetGlobalDefaultError: {0}")]
    SetGlobalDefaultError(#[source] SetGlobalDefaultError),
}

/// Fetches the current `opentelemetry::trace::TraceId` as a hexadecimal
/// string, by walking from the current [`tracing::Span`] to its
/// corresponding [`opentelemetry::Context`].
///
/// ```rust
/// # use metac_core::telemetry::get_trace_id;
/// let trace_id = get_trace_id();
/// println!("current trace id: {:?}", trace_id);
/// ```
pub fn get_trace_id() -> TraceId {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    tracing::Span::current().context().span().span_context().trace_id()
}

/// Log output format. Plain `FromStr`/`Display` rather than a `clap`
/// dependency here — `metac-core` stays decoupled from CLI parsing; the
/// binary's `Args` struct derives `clap::ValueEnum` on its own copy, or uses
/// this one via `FromStr`-backed parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => write!(f, "json"),
            LogFormat::Text => write!(f, "text"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format {other:?}, expected \"json\" or \"text\"")),
        }
    }
}

/// Initializes the global logging/tracing subscriber.
///
/// ```rust
/// # use metac_core::telemetry::{init, LogFormat};
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let otlp_url = std::env::var("OPENTELEMETRY_ENDPOINT_URL").ok();
/// init("info", LogFormat::Text, otlp_url.as_deref(), 0.1).await?;
/// # Ok(())
/// # }
/// ```
pub async fn init(log_filter: &str, log_format: LogFormat, tracing_url: Option<&str>, trace_ratio: f64) -> Result<(), Error> {
    let logger = match log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().compact().boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    let filter = EnvFilter::new(log_filter);
    let collector = Registry::default().with(logger).with(filter);

    if let Some(url) = tracing_url {
        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(url)
                    .with_timeout(Duration::from_secs(3)),
            )
            .with_trace_config(
                trace::Config::default()
                    .with_sampler(Sampler::TraceIdRatioBased(trace_ratio))
                    .with_id_generator(RandomIdGenerator::default())
                    .with_max_events_per_span(64)
                    .with_max_attributes_per_span(16)
                    .with_resource(Resource::new(vec![KeyValue::new("service.name", "metac")])),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .map_err(Error::TraceError)?;
        let tracer = provider
            .tracer_builder("opentelemetry-otlp")
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();

        let telemetry = OpenTelemetryLayer::new(tracer);
        tracing::subscriber::set_global_default(collector.with(telemetry)).map_err(Error::SetGlobalDefaultError)
    } else {
        tracing::subscriber::set_global_default(collector).map_err(Error::SetGlobalDefaultError)
    }
}


#[cfg(all(test, feature = "integration-tests"))]
mod integration_test {
    use super::*;

    // Requires OPENTELEMETRY_ENDPOINT_URL pointing at a live collector.
    #[tokio::test]
    async fn integration_get_trace_id_returns_valid_traces() {
        let otlp_url = std::env::var("OPENTELEMETRY_ENDPOINT_URL").ok();
        init("info", LogFormat::Text, otlp_url.as_deref(), 0.1).await.unwrap();

        #[tracing::instrument(name = "test_span")]
        fn test_trace_id() -> TraceId {
            get_trace_id()
        }
        assert_ne!(test_trace_id(), TraceId::INVALID, "valid trace");
    }
}
