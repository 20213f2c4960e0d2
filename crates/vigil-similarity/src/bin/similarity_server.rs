//! Vigil similarity search service
//!
//! Serves synchronous search/index calls for the triage agent and consumes
//! `alerts.result` for asynchronous indexing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tracing::{info, warn};

use vigil_bus::{subjects, Bus, BusConfig, StageWorker};
use vigil_core::Config;
use vigil_data::vector::{InMemoryVectorIndex, VectorIndex, EMBEDDING_DIM};
use vigil_similarity::embed::{Embedder, HashEmbedder, HttpEmbedder};
use vigil_similarity::http::{router, AppState};
use vigil_similarity::indexer::ResultIndexHandler;
use vigil_similarity::SimilarityService;

#[derive(Parser, Debug)]
#[command(name = "vigil-similarity")]
#[command(about = "Vigil similarity search service")]
#[command(version)]
struct Args {
    /// Port to listen on; overrides VIGIL_SIMILARITY_PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Run without the alerts.result indexer (HTTP only)
    #[arg(long, default_value_t = false)]
    no_indexer: bool,
}

async fn build_index(config: &Config) -> anyhow::Result<Arc<dyn VectorIndex>> {
    #[cfg(feature = "vector-db")]
    if let Some(path) = &config.vector_store_path {
        let index = vigil_data::vector::lance::LanceVectorIndex::open(path, EMBEDDING_DIM).await?;
        info!("  Vector index: lancedb at {}", path);
        return Ok(Arc::new(index));
    }
    #[cfg(not(feature = "vector-db"))]
    if config.vector_store_path.is_some() {
        warn!("VIGIL_VECTOR_STORE_PATH set but vector-db feature not built; using memory index");
    }
    info!("  Vector index: in-memory");
    Ok(Arc::new(InMemoryVectorIndex::new(EMBEDDING_DIM)))
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
    let port = args.port.unwrap_or(config.similarity_port);

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    info!("Starting Vigil similarity service");
    let embedder: Arc<dyn Embedder> = match &config.embedding_endpoint {
        Some(endpoint) => {
            info!("  Embedder: http at {}", endpoint);
            Arc::new(HttpEmbedder::new(endpoint.clone(), EMBEDDING_DIM))
        }
        None => {
            info!("  Embedder: deterministic feature hashing");
            Arc::new(HashEmbedder::default())
        }
    };
    let index = build_index(&config).await?;
    let service = Arc::new(SimilarityService::new(
        embedder,
        index,
        config.similarity_min_score,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Async indexing path off alerts.result
    let mut indexer_task = None;
    if !args.no_indexer {
        match Bus::connect(BusConfig::with_url(&config.broker_url)).await {
            Ok(bus) => {
                let worker = StageWorker::new(
                    bus,
                    ResultIndexHandler::new(Arc::clone(&service)),
                    subjects::RESULT,
                    Duration::from_secs(5),
                    config.prefetch,
                    Duration::from_secs(config.shutdown_grace_secs),
                    shutdown_rx.clone(),
                );
                indexer_task = Some(tokio::spawn(worker.run()));
                info!("  Indexer: consuming {}", subjects::RESULT);
            }
            Err(e) => {
                warn!("broker unreachable, async indexing disabled: {e}");
            }
        }
    }

    let state = Arc::new(AppState {
        service,
        prometheus,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(task) = indexer_task {
        let _ = task.await;
    }

    Ok(())
}
