//! perdure-daemon - durable-execution kernel daemon
//!
//! Wires the execution kernel to its subsystems and runs it until a
//! shutdown signal arrives:
//!
//! - the kernel loop runs on its own OS thread (the kernel is
//!   single-threaded by design and its coroutines are not `Send`, so the
//!   system is constructed inside that thread);
//! - the store subsystem uses `SQLite` when `--store-path` is given, the
//!   in-memory store otherwise;
//! - front-ends attach in-process through the API handle; the HTTP/gRPC
//!   surfaces live outside this binary;
//! - Prometheus metrics are served at `/metrics` unless disabled.
//!
//! On SIGINT/SIGTERM the API is shut down; the kernel loop drains what is
//! queued, finishes its live coroutines, and exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use clap::Parser;
use perdure_core::aio::queue::{InMemoryTransport, QueueProcessor};
use perdure_core::aio::store::{InMemoryStore, SqliteStore, StoreProcessor};
use perdure_core::aio::Aio;
use perdure_core::api::{Api, ApiHandle, RequestKind};
use perdure_core::handlers;
use perdure_core::metrics::KernelMetrics;
use perdure_core::system::{Config, System, SystemClock};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// perdure daemon - durable-execution kernel
#[derive(Parser, Debug)]
#[command(name = "perdure-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite task store; uses the in-memory store when absent
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Requests dequeued and submissions handed to the AIO plane per tick
    #[arg(long, default_value = "100")]
    submission_batch_size: usize,

    /// Completions drained from the AIO plane per tick
    #[arg(long, default_value = "100")]
    completion_batch_size: usize,

    /// Tasks read per enqueue or timeout pass
    #[arg(long, default_value = "100")]
    task_batch_size: usize,

    /// How long an enqueued task may sit unclaimed, in milliseconds
    #[arg(long, default_value = "10000")]
    task_enqueue_delay_ms: u64,

    /// Ticks between enqueue passes
    #[arg(long, default_value = "10")]
    enqueue_interval: u64,

    /// Ticks between timeout passes
    #[arg(long, default_value = "10")]
    timeout_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Port for the Prometheus metrics HTTP endpoint
    #[arg(long, default_value = "9400")]
    metrics_port: u16,

    /// Disable the Prometheus metrics HTTP endpoint
    #[arg(long)]
    no_metrics: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let config = Config {
        submission_batch_size: args.submission_batch_size,
        completion_batch_size: args.completion_batch_size,
        task_batch_size: args.task_batch_size,
        task_enqueue_delay: Duration::from_millis(args.task_enqueue_delay_ms),
        ..Config::default()
    };

    let registry = Registry::new();
    let metrics = KernelMetrics::new(&registry).context("failed to register kernel metrics")?;

    let (api, handle) = Api::new(config.api_queue_size);

    let mut aio = Aio::new();
    match &args.store_path {
        Some(path) => {
            info!(path = %path.display(), "opening sqlite task store");
            let store = SqliteStore::open(path)
                .with_context(|| format!("failed to open task store at {}", path.display()))?;
            aio.register(StoreProcessor::new(store), config.aio_queue_size);
        }
        None => {
            info!("using in-memory task store");
            aio.register(
                StoreProcessor::new(InMemoryStore::new()),
                config.aio_queue_size,
            );
        }
    }
    aio.register(
        QueueProcessor::new(InMemoryTransport::new()),
        config.aio_queue_size,
    );

    // The kernel is single-threaded and its coroutines are not Send, so the
    // system is assembled and run entirely on its own thread.
    let enqueue_interval = args.enqueue_interval;
    let timeout_interval = args.timeout_interval;
    let kernel = std::thread::Builder::new()
        .name("perdure-kernel".to_string())
        .spawn(move || {
            let mut system = System::new(config, api, Box::new(aio), metrics);
            system.add_on_request(RequestKind::ClaimTask, Box::new(handlers::claim_task));
            system.add_on_request(RequestKind::CompleteTask, Box::new(handlers::complete_task));
            system.add_on_request(
                RequestKind::HeartbeatTask,
                Box::new(handlers::heartbeat_task),
            );
            system.add_on_tick(enqueue_interval, Box::new(handlers::enqueue_tasks));
            system.add_on_tick(timeout_interval, Box::new(handlers::timeout_tasks));

            info!("kernel loop starting");
            system.run(&SystemClock);
            info!("kernel loop drained");
        })
        .context("failed to spawn kernel thread")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    runtime.block_on(serve(&args, registry, handle.clone()))?;

    kernel
        .join()
        .map_err(|_| anyhow::anyhow!("kernel thread panicked"))?;
    info!("shutdown complete");
    Ok(())
}

/// Serves the metrics endpoint until a shutdown signal, then drains the API.
async fn serve(args: &Args, registry: Registry, handle: ApiHandle) -> Result<()> {
    let metrics_server = if args.no_metrics {
        None
    } else {
        let addr = SocketAddr::from(([127, 0, 0, 1], args.metrics_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics endpoint on {addr}"))?;
        info!(%addr, "metrics endpoint listening");

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move { encode_metrics(&registry) }
            }),
        );
        Some(tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!(%err, "metrics endpoint failed");
            }
        }))
    };

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received, draining");
    handle.shutdown();

    if let Some(server) = metrics_server {
        server.abort();
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
    Ok(())
}

fn encode_metrics(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(%err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
