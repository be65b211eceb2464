// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{http::StatusCode, routing::get, Router};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use verticadb_operator::{
    constants::{
        DEFAULT_METRICS_ADDR, DEFAULT_REQUEUE_SECS, DEFAULT_WORKER_THREADS,
        ERROR_REQUEUE_DURATION_SECS, KIND_VERTICA_DB,
    },
    context::{Context, Settings},
    crd::VerticaDB,
    metrics,
    reconcilers::reconcile_verticadb,
};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

/// Kubernetes operator for Vertica databases
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Only watch `VerticaDB` resources in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Address of the metrics and health endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = DEFAULT_METRICS_ADDR)]
    metrics_addr: SocketAddr,

    /// Tokio worker threads
    #[arg(long, env = "WORKER_THREADS", default_value_t = DEFAULT_WORKER_THREADS)]
    worker_threads: usize,

    /// Requeue interval in seconds once a database matches its spec
    #[arg(long, env = "REQUEUE_SECS", default_value_t = DEFAULT_REQUEUE_SECS)]
    requeue_secs: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads)
        .thread_name("verticadb-operator")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<()> {
    // Format: timestamp file:line LEVEL message
    //
    // RUST_LOG sets the filter (default info), RUST_LOG_FORMAT=json switches to JSON output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting VerticaDB operator");
    debug!(?args, "Parsed operator arguments");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let settings = Settings {
        requeue_after: Duration::from_secs(args.requeue_secs),
    };
    let ctx = Arc::new(Context::new(client.clone(), settings));

    // Neither task should ever exit; if one does, the process exits with it.
    tokio::select! {
        result = run_verticadb_controller(client, args.namespace, ctx) => {
            error!("CRITICAL: VerticaDB controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("VerticaDB controller exited unexpectedly without error")
        }
        result = run_metrics_server(args.metrics_addr) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
    }
}

/// Run the `VerticaDB` controller
///
/// Owned statefulsets and services trigger a reconcile of their `VerticaDB`.
async fn run_verticadb_controller(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context>,
) -> Result<()> {
    let (vdbs, statefulsets, services) = match namespace.as_deref() {
        Some(ns) => {
            info!(namespace = %ns, "Starting VerticaDB controller");
            (
                Api::<VerticaDB>::namespaced(client.clone(), ns),
                Api::<StatefulSet>::namespaced(client.clone(), ns),
                Api::<Service>::namespaced(client, ns),
            )
        }
        None => {
            info!("Starting VerticaDB controller with cluster-wide watch");
            (
                Api::<VerticaDB>::all(client.clone()),
                Api::<StatefulSet>::all(client.clone()),
                Api::<Service>::all(client),
            )
        }
    };

    Controller::new(vdbs, Config::default())
        .owns(statefulsets, Config::default())
        .owns(services, Config::default())
        .run(reconcile_verticadb_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `VerticaDB`
async fn reconcile_verticadb_wrapper(
    vdb: Arc<VerticaDB>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = vdb.name_any();
    match reconcile_verticadb(vdb, ctx).await {
        Ok(action) => {
            info!("Successfully reconciled VerticaDB: {}", name);
            Ok(action)
        }
        Err(e) => {
            error!("Failed to reconcile VerticaDB {}: {:#}", name, e);
            Err(e.into())
        }
    }
}

/// Error policy for controller
fn error_policy(vdb: Arc<VerticaDB>, _err: &ReconcileError, _ctx: Arc<Context>) -> Action {
    metrics::record_reconciliation_requeue(KIND_VERTICA_DB, "error");
    debug!("Requeueing VerticaDB {} after error", vdb.name_any());
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

/// Serve `/metrics` and `/healthz`
async fn run_metrics_server(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }));

    info!("Metrics server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
