//! Asynchronous content ingestion and enrichment pipeline.
//!
//! Fetches raw items from external sources, normalizes them into
//! canonical records against the CMS collaborator, downloads and
//! transcodes media, then transcribes and embeds. Each stage is a
//! durable job-store queue with its own bounded worker pool.

mod admin;
mod circuit_breaker;
mod cms_client;
mod config;
mod dedup;
mod embedder;
mod error;
mod http_client;
mod job_store;
pub mod metrics;
mod object_store;
pub mod pipeline;
mod rate_limiter;
mod registry;
pub mod schemas;
mod sources;
mod transcoder;
mod transcriber_client;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::admin::{start_admin_server, AdminState};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::cms_client::CmsClient;
use crate::config::Config;
use crate::dedup::DedupStore;
use crate::embedder::{Embedder, HashFeatureModel};
use crate::http_client::{HttpClientConfig, ResilientHttpClient};
use crate::job_store::redis_store::RedisJobStore;
use crate::job_store::JobStore;
use crate::metrics::{start_metrics_server, MetricsReporter};
use crate::object_store::{ObjectStore, ObjectStoreConfig};
use crate::pipeline::enrichment_stage::EnrichmentStageHandler;
use crate::pipeline::fetch_stage::FetchStageHandler;
use crate::pipeline::media_stage::MediaStageHandler;
use crate::pipeline::normalize_stage::NormalizeStageHandler;
use crate::pipeline::{spawn_workers, PipelineConfig};
use crate::rate_limiter::RateLimiter;
use crate::registry::SourceRegistry;
use crate::transcoder::Transcoder;
use crate::transcriber_client::TranscriberClient;

#[derive(Parser, Debug)]
#[command(name = "ingestion-pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Asynchronous content ingestion and enrichment pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker runtime (fetch, normalize, media, enrichment workers)
    Run,

    /// Show queue depths and breaker states
    Status,
}

fn setup_logging(log_level: &str, json_output: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_output {
        tracing_subscriber::registry().with(filter).with(fmt::layer().json()).init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, initiating graceful shutdown"),
        _ = terminate => info!("received sigterm, initiating graceful shutdown"),
    }
}

/// Everything initialized during startup, torn down in reverse order on
/// shutdown so no stage outlives a dependency it needs to drain cleanly.
struct Runtime {
    store: Arc<dyn JobStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics_reporter: MetricsReporter,
    registry: Arc<SourceRegistry>,
    pipeline: crate::pipeline::PipelineHandles,
}

async fn init_runtime(config: &Config) -> Result<Runtime> {
    let redis_client = redis::Client::open(config.queue_store_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;

    let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::connect(&config.queue_store_url).await?);

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: config.breaker_failure_threshold,
        open_duration: std::time::Duration::from_millis(config.breaker_reset_timeout_ms),
        success_threshold: config.breaker_half_open_probes,
        half_open_max_requests: config.breaker_half_open_probes,
    };
    let breakers = Arc::new(CircuitBreakerRegistry::new(breaker_config));

    let rate_limiter = Arc::new(RateLimiter::new(redis_conn.clone()));
    let dedup = Arc::new(DedupStore::with_redis(100_000, redis_conn.clone(), 24 * 60 * 60));

    let http = Arc::new(ResilientHttpClient::new(HttpClientConfig::default())?);
    let plain_http = reqwest::Client::builder().user_agent(format!("ingestion-pipeline/{}", env!("CARGO_PKG_VERSION"))).build()?;

    let cms = Arc::new(CmsClient::new(
        http.clone(),
        breakers.clone(),
        config.collaborator_base_url.clone(),
        config.collaborator_service_token.clone(),
        config.collaborator_service_name.clone(),
    ));

    let object_store = Arc::new(
        ObjectStore::new(ObjectStoreConfig {
            bucket: config.object_store_bucket.clone(),
            endpoint_url: config.object_store_endpoint.clone(),
            public_base_url: config.object_store_public_url.clone(),
            region: config.object_store_region.clone(),
        })
        .await?,
    );

    let transcoder = Arc::new(Transcoder::new(config.media_temp_dir.clone(), plain_http.clone()));
    let transcriber = Arc::new(TranscriberClient::new(http.clone(), config.transcriber_url.clone()));
    let embedder = Arc::new(Embedder::<HashFeatureModel>::new(config.embedding_dimension));

    tokio::fs::create_dir_all(&config.media_temp_dir).await.ok();

    let fetch_handler = Arc::new(FetchStageHandler::new(plain_http.clone(), store.clone(), rate_limiter.clone(), breakers.clone()));
    let normalize_handler = Arc::new(NormalizeStageHandler::new(cms.clone(), dedup.clone(), store.clone()));
    let media_handler = Arc::new(MediaStageHandler::new(transcoder.clone(), object_store.clone(), cms.clone(), store.clone()));
    let enrichment_handler = Arc::new(EnrichmentStageHandler::new(transcoder.clone(), transcriber.clone(), embedder.clone(), cms.clone()));

    let pipeline_config = PipelineConfig {
        fetch_concurrency: config.worker_concurrency,
        normalize_concurrency: config.worker_concurrency,
        media_concurrency: (config.worker_concurrency / 2).max(1),
        enrichment_concurrency: (config.worker_concurrency * 3 / 5).max(1),
        ..PipelineConfig::default()
    };

    let pipeline = spawn_workers(store.clone(), pipeline_config, fetch_handler, normalize_handler, media_handler, enrichment_handler);

    let registry = Arc::new(SourceRegistry::new(store.clone()));

    let metrics_reporter = MetricsReporter::new(store.clone(), 30);
    metrics_reporter.start();

    Ok(Runtime { store, breakers, metrics_reporter, registry, pipeline })
}

async fn run() -> Result<()> {
    let config = Config::load()?;

    info!(
        collaborator = %config.collaborator_base_url,
        worker_concurrency = config.worker_concurrency,
        "configuration loaded"
    );

    let runtime = init_runtime(&config).await?;

    if config.metrics_enabled {
        let metrics_addr: SocketAddr = format!("0.0.0.0:{}", config.metrics_port).parse()?;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_addr).await {
                error!(error = %e, "metrics server failed");
            }
        });
        info!(port = config.metrics_port, "metrics server started");
    }

    let admin_state = Arc::new(AdminState { registry: runtime.registry.clone(), store: runtime.store.clone() });
    let admin_addr: SocketAddr = format!("0.0.0.0:{}", config.admin_port).parse()?;
    tokio::spawn(async move {
        if let Err(e) = start_admin_server(admin_addr, admin_state).await {
            error!(error = %e, "admin server failed");
        }
    });
    info!(port = config.admin_port, "admin server started");

    info!("ingestion pipeline running");

    shutdown_signal().await;

    info!("tearing down runtime in reverse order");
    runtime.metrics_reporter.stop();
    runtime.registry.shutdown();
    runtime.pipeline.shutdown(std::time::Duration::from_secs(30)).await;
    drop(runtime.breakers);
    drop(runtime.store);

    info!("ingestion pipeline stopped");
    Ok(())
}

async fn show_status() -> Result<()> {
    let config = Config::load()?;
    let store: Arc<dyn JobStore> = Arc::new(RedisJobStore::connect(&config.queue_store_url).await?);

    println!("\ningestion pipeline status\n==========================\n");
    for queue in crate::metrics::ALL_STAGES {
        let counts = store.counts(queue).await?;
        println!(
            "  {queue:<12} waiting={:<6} active={:<6} delayed={:<6} completed={:<6} failed={:<6}",
            counts.waiting, counts.active, counts.delayed, counts.completed, counts.failed
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let json_logs = std::env::var("LOG_JSON").map(|v| v == "true").unwrap_or(false);
    setup_logging(&log_level, json_logs);

    match cli.command {
        Commands::Run => run().await,
        Commands::Status => show_status().await,
    }
}
