//! Vigil threat-intel aggregator worker

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};

use vigil_bus::{shutdown, subjects, Bus, BusConfig, StageWorker};
use vigil_core::Config;
use vigil_data::cache::CachePool;
use vigil_data::db::Db;
use vigil_intel::sources::{HttpThreatSource, ThreatSource, Vendor};
use vigil_intel::IntelHandler;

#[derive(Parser, Debug)]
#[command(name = "vigil-intel")]
#[command(about = "Vigil threat-intel aggregator worker")]
#[command(version)]
struct Args {
    /// Prometheus exporter port
    #[arg(long, default_value_t = 19014)]
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

    info!("Starting Vigil threat-intel aggregator");

    // Sources without keys are disabled; remaining weights renormalize in
    // the aggregation, not here
    let mut sources: Vec<Arc<dyn ThreatSource>> = Vec::new();
    for sc in &config.threat_sources {
        if !sc.enabled {
            warn!(source = %sc.name, "no API key configured, source disabled");
            continue;
        }
        let Some(vendor) = Vendor::from_name(&sc.name) else {
            warn!(source = %sc.name, "unknown vendor, skipping");
            continue;
        };
        info!("  Source {}: weight {}", sc.name, sc.weight);
        sources.push(Arc::new(HttpThreatSource::new(
            sc.name.clone(),
            vendor,
            sc.weight,
            sc.endpoint.clone(),
            sc.api_key.clone(),
            Duration::from_millis(sc.timeout_ms),
        )));
    }
    if sources.is_empty() {
        warn!("no threat sources enabled; alerts will pass through with clean summaries");
    }

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
    let handler = IntelHandler::new(sources, db, cache, config.intel_cache_ttl_secs);

    let worker = StageWorker::new(
        bus,
        handler,
        subjects::ENRICHED,
        Duration::from_millis(config.intel_deadline_ms),
        config.prefetch,
        Duration::from_secs(config.shutdown_grace_secs),
        shutdown_rx,
    );

    worker.run().await?;
    Ok(())
}
