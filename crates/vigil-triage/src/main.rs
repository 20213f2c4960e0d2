//! Vigil triage worker

use std::time::Duration;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

use vigil_bus::{shutdown, subjects, Bus, BusConfig, StageWorker};
use vigil_core::Config;
use vigil_data::db::Db;
use vigil_triage::llm::{LlmClient, RouterClient};
use vigil_triage::similar::SimilarityClient;
use vigil_triage::TriageHandler;

#[derive(Parser, Debug)]
#[command(name = "vigil-triage")]
#[command(about = "Vigil AI triage worker")]
#[command(version)]
struct Args {
    /// Prometheus exporter port
    #[arg(long, default_value_t = 19015)]
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

    info!("Starting Vigil triage agent");
    info!("  LLM router: {}", config.llm_router_url);
    info!("  Fallback model: {}", config.llm_fallback.model);
    info!("  Similarity: {}", config.similarity_url);

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

    let router = RouterClient::new(config.llm_router_url.clone(), config.llm_fallback.clone());
    let llm = LlmClient::new(Duration::from_secs(config.llm_timeout_secs));
    let similarity = SimilarityClient::new(
        config.similarity_url.clone(),
        Duration::from_millis(config.similarity_timeout_ms),
        config.similarity_top_k,
    );

    let shutdown_rx = shutdown::spawn_signal_listener();
    let handler = TriageHandler::new(db, router, llm, similarity);

    let worker = StageWorker::new(
        bus,
        handler,
        subjects::CONTEXTUALIZED,
        Duration::from_millis(config.triage_deadline_ms),
        config.prefetch,
        Duration::from_secs(config.shutdown_grace_secs),
        shutdown_rx,
    );

    worker.run().await?;
    Ok(())
}
