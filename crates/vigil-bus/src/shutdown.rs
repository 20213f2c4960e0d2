//! Shutdown signal plumbing for worker binaries

use tokio::sync::watch;
use tracing::info;

/// Watch channel flipped to true on SIGTERM or ctrl-c.
///
/// Workers stop fetching when the flag flips and drain in-flight work up to
/// their grace period.
pub fn spawn_signal_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("sigterm handler");
            tokio::select! {
                _ = ctrl_c => info!("ctrl-c received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("ctrl-c received");
        }

        let _ = tx.send(true);
    });

    rx
}
