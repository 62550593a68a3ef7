use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use clap::{crate_authors, crate_description, crate_version, Parser, Subcommand};
use futures::StreamExt;
use kube::core::{DynamicObject, GroupVersionKind};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, Config};
use metac_core::client::DynamicClientFactory;
use metac_core::cluster::ClusterReconciler;
use metac_core::registry::Registry;
use metac_core::telemetry;
use metac_core::watch::{GroupKind, Watch};
use metac_core::webhook::{SyncRequest, SyncResponse};
use metac_core::UnstructuredExt;
use metac_k8s::{new_client_with_metrics, KubeDynamicClientFactory};
use prometheus_client::registry::Registry as MetricsRegistry;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Duration;
use tracing::instrument;

mod config;
mod error;

use config::ControllerConfig;
use error::Error;

#[get("/metrics")]
async fn metrics(c: Data<Arc<metac_core::metrics::Metrics>>, _req: HttpRequest) -> impl Responder {
    let mut buffer = String::new();
    match prometheus_client::encoding::text::encode(&mut buffer, &c.registry) {
        Ok(()) => HttpResponse::Ok()
            .content_type("application/openmetrics-text; version=1.0.0; charset=utf-8")
            .body(buffer),
        Err(e) => {
            tracing::error!("failed to encode metrics: {e:?}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[derive(Parser, Debug)]
#[command(
    name = "metac",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Listen on given port for the metrics/health server
    #[arg(short, long, default_value_t = 8080, env)]
    port: u32,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`.
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format ("text" or "json")
    #[arg(long, default_value = "text", env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,

    /// URL the controller POSTs `SyncRequest` to and reads `SyncResponse` back from.
    #[arg(long, env = "METAC_WEBHOOK_URL")]
    webhook_url: String,

    /// `apiVersion` of the watched (parent) resource.
    #[arg(long, env = "METAC_WATCH_API_VERSION")]
    watch_api_version: String,

    /// `kind` of the watched (parent) resource.
    #[arg(long, env = "METAC_WATCH_KIND")]
    watch_kind: String,

    /// Namespace to watch; empty watches cluster-wide.
    #[arg(long, default_value = "", env = "METAC_WATCH_NAMESPACE")]
    watch_namespace: String,

    /// TOML file describing the child resources this controller manages and
    /// the per-resource reconcile policy (update strategy, patch mode, etc).
    #[arg(short, long, env = "METAC_CONFIG")]
    config: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the webhook-driven reconcile loop plus the metrics/health server (default).
    Run,
    /// Dispatch a single webhook sync and apply its response, without starting a watch loop.
    /// Reads a `{"parent": ..., "attachments": [...]}` document from `--input`.
    ApplyOnce {
        #[arg(long)]
        input: PathBuf,
    },
}

/// What the controller and web server share: a dynamic client factory, the
/// loaded controller config, Prometheus metrics, and the webhook HTTP client.
struct Context {
    factory: Arc<dyn DynamicClientFactory>,
    config: ControllerConfig,
    metrics: Arc<metac_core::metrics::Metrics>,
    http: reqwest::Client,
    webhook_url: String,
}

#[instrument(skip(parent, ctx), fields(trace_id))]
async fn reconcile(parent: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action, Error> {
    let trace_id = telemetry::get_trace_id();
    tracing::Span::current().record("trace_id", tracing::field::display(&trace_id));
    let _timer = ctx.metrics.reconcile.count_and_measure(&trace_id);

    let parent_value = serde_json::to_value(&*parent).map_err(|e| Error::UserInput(e.to_string()))?;
    let watch = Watch::from_object(&parent_value).ok_or_else(|| Error::UserInput("watch object is missing apiVersion/kind/uid".to_owned()))?;

    let mut observed = Registry::new();
    for child in &ctx.config.children {
        let client = ctx.factory.namespace(&child.group_kind(), &watch.namespace)?;
        for obj in client.list().await? {
            if child.selector.matches(&obj, Some(&parent_value))? {
                observed.insert_by_reference(&watch, obj);
            }
        }
    }

    let request = SyncRequest {
        parent: parent_value.clone(),
        attachments: observed.list().into_iter().cloned().collect(),
        finalizing: parent_value.deletion_timestamp().is_some(),
    };

    let response: SyncResponse = ctx
        .http
        .post(&ctx.webhook_url)
        .json(&request)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let resync = response.resync_delay().unwrap_or(ctx.config.resync_period_seconds as f64);

    let mut desired = Registry::new();
    for attachment in response.attachments {
        desired.insert_by_reference(&watch, attachment);
    }
    let policy = Arc::new(ctx.config.policy_for(watch));
    let cluster = ClusterReconciler::new(ctx.factory.clone(), policy);
    cluster.apply(&observed, &desired, &HashMap::new(), &Registry::new()).await?;

    Ok(Action::requeue(Duration::from_secs_f64(resync)))
}

fn error_policy(parent: Arc<DynamicObject>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::warn!("reconcile failed: {error:?}");
    if let Ok(value) = serde_json::to_value(&*parent) {
        ctx.metrics.reconcile.set_failure(&value, &metac_core::Error::Apply(error.to_string()));
    }
    Action::requeue(Duration::from_secs(5 * 60))
}

fn to_gvk(group_kind: &GroupKind) -> GroupVersionKind {
    let (group, version) = match group_kind.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", group_kind.api_version.as_str()),
    };
    GroupVersionKind::gvk(group, version, &group_kind.kind)
}

async fn run(args: Args, ctx: Arc<Context>, client: Client) -> anyhow::Result<()> {
    let watch_gk = GroupKind::new(args.watch_api_version.clone(), args.watch_kind.clone());
    let discovery = kube::discovery::Discovery::new(client.clone()).run().await?;
    let gvk = to_gvk(&watch_gk);
    let (ar, caps) = discovery.resolve_gvk(&gvk).ok_or_else(|| anyhow::anyhow!("could not discover {watch_gk}"))?;

    let api: Api<DynamicObject> = if caps.scope == kube::discovery::Scope::Namespaced && !args.watch_namespace.is_empty() {
        Api::namespaced_with(client, &args.watch_namespace, &ar)
    } else {
        Api::all_with(client, &ar)
    };

    let controller = Controller::new_with(api, watcher::Config::default().any_semantic(), ar)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .filter_map(|x| async move { x.ok() })
        .for_each(|_| futures::future::ready(()));

    let metrics_data = ctx.metrics.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(metrics_data.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(health)
            .service(metrics)
    })
    .bind(format!("0.0.0.0:{}", args.port))?
    .shutdown_timeout(5);

    let (_, server_result) = tokio::join!(controller, server.run());
    server_result?;
    Ok(())
}

async fn apply_once(input: PathBuf, ctx: Arc<Context>) -> anyhow::Result<()> {
    #[derive(Deserialize)]
    struct Input {
        parent: Value,
        #[serde(default)]
        attachments: Vec<Value>,
    }

    let raw = std::fs::read_to_string(&input)?;
    let input: Input = serde_json::from_str(&raw)?;
    let watch = Watch::from_object(&input.parent).ok_or_else(|| anyhow::anyhow!("parent is missing apiVersion/kind/uid"))?;

    let mut observed = Registry::new();
    for obj in input.attachments {
        observed.insert_by_reference(&watch, obj);
    }

    let request = SyncRequest {
        parent: input.parent,
        attachments: observed.list().into_iter().cloned().collect(),
        finalizing: false,
    };
    let response: SyncResponse = ctx.http.post(&ctx.webhook_url).json(&request).send().await?.error_for_status()?.json().await?;

    let mut desired = Registry::new();
    for attachment in response.attachments {
        desired.insert_by_reference(&watch, attachment);
    }

    let policy = Arc::new(ctx.config.policy_for(watch));
    let cluster = ClusterReconciler::new(ctx.factory.clone(), policy);
    match cluster.apply(&observed, &desired, &HashMap::new(), &Registry::new()).await {
        Ok(()) => println!("apply-once succeeded"),
        Err(e) => eprintln!("apply-once failed: {e}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    telemetry::init(&args.log_filter, args.log_format.clone(), args.tracing_url.as_deref(), args.sample_ratio).await?;

    let raw_config = std::fs::read_to_string(&args.config)?;
    let config: ControllerConfig = toml::from_str(&raw_config)?;

    let mut metrics_registry = MetricsRegistry::with_prefix("metac");
    let kube_config = Config::infer().await?;
    let client = new_client_with_metrics(kube_config, &mut metrics_registry).await?;
    let factory = Arc::new(KubeDynamicClientFactory::discover(client.clone()).await?);

    let app_metrics = Arc::new(metac_core::metrics::Metrics {
        reconcile: metac_core::metrics::ReconcileMetrics::default().register(&mut metrics_registry),
        registry: Arc::new(metrics_registry),
    });

    let ctx = Arc::new(Context {
        factory,
        config,
        metrics: app_metrics,
        http: reqwest::Client::new(),
        webhook_url: args.webhook_url.clone(),
    });

    match args.command {
        Some(Command::ApplyOnce { input }) => apply_once(input, ctx).await,
        Some(Command::Run) | None => run(args, ctx, client).await,
    }
}
