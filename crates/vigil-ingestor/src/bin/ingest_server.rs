//! Vigil ingestion service
//!
//! Accepts alerts over HTTP, persists them, and feeds the pipeline. On
//! startup, re-emits any alerts a previous crash left unpublished.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

use vigil_bus::{Bus, BusConfig};
use vigil_core::limiter::TokenBucketLimiter;
use vigil_core::Config;
use vigil_data::db::Db;
use vigil_ingestor::http::{router, AppState};
use vigil_ingestor::IngestService;

#[derive(Parser, Debug)]
#[command(name = "vigil-ingestor")]
#[command(about = "Vigil alert ingestion service")]
#[command(version)]
struct Args {
    /// Port to listen on; overrides VIGIL_INGEST_PORT
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    vigil_core::process::exit_on_panic();

    let args = Args::parse();
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    let port = args.port.unwrap_or(config.ingest_port);

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    info!("Starting Vigil ingestor");
    info!("  Rate limit: {}/min per client", config.rate_limit_per_min);
    info!("  Max batch: {}", config.max_batch_size);

    let db = match Db::connect(&config.database_url, config.db_pool_size()).await {
        Ok(db) => db,
        Err(e) => {
            error!("database unreachable: {e}");
            std::process::exit(1);
        }
    };
    db.ensure_schema().await?;

    let bus = match Bus::connect(BusConfig::with_url(&config.broker_url)).await {
        Ok(bus) => bus,
        Err(e) => {
            error!("broker unreachable: {e}");
            std::process::exit(1);
        }
    };

    let service = Arc::new(IngestService::new(db, bus));

    // Recover anything a previous run persisted but never published
    let reconciler = Arc::clone(&service);
    tokio::spawn(async move {
        reconciler.reconcile().await;
    });

    let state = Arc::new(AppState {
        service,
        limiter: TokenBucketLimiter::per_minute(config.rate_limit_per_min),
        prometheus,
        max_batch: config.max_batch_size,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await?;

    Ok(())
}
