//! Vigil context collector worker

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::json;
use tracing::{error, info};

use vigil_bus::{shutdown, subjects, Bus, BusConfig, StageWorker};
use vigil_context::network::parse_cidrs;
use vigil_context::providers::{
    CachedProvider, ContextProvider, HttpContextProvider, StaticContextProvider,
};
use vigil_context::{Collectors, ContextHandler};
use vigil_core::Config;
use vigil_data::cache::CachePool;
use vigil_data::db::Db;

#[derive(Parser, Debug)]
#[command(name = "vigil-context")]
#[command(about = "Vigil context collector worker: network, asset, user enrichment")]
#[command(version)]
struct Args {
    /// Prometheus exporter port
    #[arg(long, default_value_t = 19013)]
    metrics_port: u16,
}

/// HTTP provider when an endpoint is configured, static double otherwise
fn build_provider(
    name: &str,
    endpoint: Option<&String>,
    fallback_default: serde_json::Value,
    timeout: Duration,
) -> Arc<dyn ContextProvider> {
    match endpoint {
        Some(endpoint) => {
            info!("  Provider {name}: http at {endpoint}");
            Arc::new(HttpContextProvider::new(name, endpoint.clone(), timeout))
        }
        None => {
            info!("  Provider {name}: static double");
            Arc::new(StaticContextProvider::new(name).with_default(fallback_default))
        }
    }
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

    info!("Starting Vigil context collector");

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

    let provider_timeout = Duration::from_millis(config.context_join_timeout_ms);
    let geoip = build_provider(
        "geoip",
        config.geoip_endpoint.as_ref(),
        json!({"country": null, "asn": null, "reputation_score": 50}),
        provider_timeout,
    );
    let cmdb = build_provider(
        "cmdb",
        config.cmdb_endpoint.as_ref(),
        json!({"asset_type": "unknown", "criticality": "medium", "environment": "unknown"}),
        provider_timeout,
    );
    let directory = build_provider(
        "directory",
        config.directory_endpoint.as_ref(),
        json!({"department": "unknown", "privilege_level": "standard", "account_status": "active"}),
        provider_timeout,
    );

    let wrap = |p: Arc<dyn ContextProvider>| -> Arc<dyn ContextProvider> {
        Arc::new(CachedProvider::new(
            p,
            cache.clone(),
            config.enrichment_cache_ttl_secs,
        ))
    };

    let collectors = Collectors::new(
        wrap(geoip),
        wrap(cmdb),
        wrap(directory),
        parse_cidrs(&config.internal_cidrs),
        config.enrichment_cache_ttl_secs,
    );

    let shutdown_rx = shutdown::spawn_signal_listener();
    let handler = ContextHandler::new(
        collectors,
        db,
        Duration::from_millis(config.context_join_timeout_ms),
    );

    let worker = StageWorker::new(
        bus,
        handler,
        subjects::NORMALIZED,
        Duration::from_millis(config.context_deadline_ms),
        config.prefetch,
        Duration::from_secs(config.shutdown_grace_secs),
        shutdown_rx,
    );

    worker.run().await?;
    Ok(())
}
