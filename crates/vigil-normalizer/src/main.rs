//! Vigil normalizer worker

use std::time::Duration;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

use vigil_bus::{shutdown, subjects, Bus, BusConfig, StageWorker};
use vigil_core::Config;
use vigil_data::cache::CachePool;
use vigil_data::db::Db;
use vigil_normalizer::NormalizerHandler;

#[derive(Parser, Debug)]
#[command(name = "vigil-normalizer")]
#[command(about = "Vigil normalizer worker: vendor formats, IOC extraction, dedup")]
#[command(version)]
struct Args {
    /// Prometheus exporter port
    #[arg(long, default_value_t = 19012)]
    metrics_port: u16,
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

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], args.metrics_port))
        .install()?;

    info!("Starting Vigil normalizer");
    info!("  Dedup window: {}s", config.dedup_window_secs);

    let db = match Db::connect(&config.database_url, config.db_pool_size()).await {
        Ok(db) => db,
        Err(e) => {
            error!("database unreachable: {e}");
            std::process::exit(1);
        }
    };
    db.ensure_schema().await?;

    let cache = match CachePool::connect(&config.cache_url).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("cache unreachable: {e}");
            std::process::exit(1);
        }
    };

    let bus = match Bus::connect(BusConfig::with_url(&config.broker_url)).await {
        Ok(bus) => bus,
        Err(e) => {
            error!("broker unreachable: {e}");
            std::process::exit(1);
        }
    };

    let shutdown_rx = shutdown::spawn_signal_listener();
    let handler = NormalizerHandler::new(db, cache, config.dedup_window_secs);

    let worker = StageWorker::new(
        bus,
        handler,
        subjects::RAW,
        // Normalization is CPU-light; the broker ack window is the bound
        Duration::from_secs(30),
        config.prefetch,
        Duration::from_secs(config.shutdown_grace_secs),
        shutdown_rx,
    );

    worker.run().await?;
    Ok(())
}
