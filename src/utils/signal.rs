//! Shutdown signal handling for the host loop

use tokio::signal;
use tracing::{info, warn};

/// Resolve once the host is asked to stop (SIGTERM, SIGINT or Ctrl+C)
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, unloading modules"),
                    _ = signal::ctrl_c() => info!("Received interrupt, unloading modules"),
                }
                return;
            }
            Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt, unloading modules"),
        Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
    }
}
