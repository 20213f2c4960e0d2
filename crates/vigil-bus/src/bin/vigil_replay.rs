//! DLQ replay tool
//!
//! Moves dead-lettered messages back onto their primary subject after the
//! underlying fault is fixed.

use clap::Parser;
use tracing::info;

use vigil_bus::{replay, subjects, Bus, BusConfig};

#[derive(Parser, Debug)]
#[command(name = "vigil-replay")]
#[command(about = "Replay dead-lettered pipeline messages")]
#[command(version)]
struct Args {
    /// Broker URL; overrides VIGIL_BROKER_URL
    #[arg(long)]
    broker_url: Option<String>,

    /// Primary subject to replay (e.g. alerts.raw); all subjects when omitted
    #[arg(short, long)]
    subject: Option<String>,

    /// Max messages to replay per subject
    #[arg(short, long, default_value_t = 100)]
    limit: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let broker_url = args
        .broker_url
        .or_else(|| std::env::var("VIGIL_BROKER_URL").ok())
        .unwrap_or_else(|| "nats://localhost:4222".to_string());

    let bus = Bus::connect(BusConfig::with_url(broker_url)).await?;

    let report = match args.subject.as_deref() {
        Some(subject) => {
            anyhow::ensure!(
                subjects::ALL.contains(&subject),
                "unknown subject {subject}; expected one of {:?}",
                subjects::ALL
            );
            replay::replay_dlq(&bus, subject, args.limit).await?
        }
        None => replay::replay_all(&bus, args.limit).await?,
    };

    info!(
        replayed = report.replayed,
        failed = report.failed,
        "replay complete"
    );
    Ok(())
}
