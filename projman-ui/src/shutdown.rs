//! Shutdown on Ctrl+C / SIGTERM: stop every running project first.

use tracing::{info, warn};

use crate::state::AppState;

/// Resolve when the process is asked to stop.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(err = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(err = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}

/// Stop all running projects (terminate, then kill after the configured
/// grace period).
pub async fn stop_running_projects(state: &AppState) {
    let grace = state.settings().stop_timeout();
    info!(grace_secs = grace.as_secs(), "stopping running projects");
    state.stop_all(grace).await;
    info!("shutdown complete");
}
