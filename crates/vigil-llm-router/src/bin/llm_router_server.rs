//! Vigil LLM router service
//!
//! Serves routing decisions and the optional completion proxy for the
//! triage agent. Probes provider health in the background.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use vigil_core::Config;
use vigil_llm_router::http::{router, AppState};
use vigil_llm_router::probe::run_prober;
use vigil_llm_router::registry::ModelRegistry;

#[derive(Parser, Debug)]
#[command(name = "vigil-llm-router")]
#[command(about = "Vigil LLM routing service")]
#[command(version)]
struct Args {
    /// Port to listen on; overrides VIGIL_LLM_ROUTER_PORT
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
    let port = args.port.unwrap_or(config.llm_router_port);

    let prometheus = PrometheusBuilder::new().install_recorder()?;
    let registry = Arc::new(ModelRegistry::with_defaults());

    info!("Starting Vigil LLM router");
    info!("  Models: {}", registry.models().len());
    info!("  Port: {}", port);

    tokio::spawn(run_prober(Arc::clone(&registry)));

    let state = Arc::new(AppState {
        registry,
        client: reqwest::Client::new(),
        prometheus,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
