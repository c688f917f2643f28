use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Exit code used when a second signal cuts the graceful shutdown short.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Resolves on the next Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Cancels `cancel` on the first signal from `next_signal`, then returns once
/// a second signal arrives. The caller decides how to abort at that point.
pub async fn escalate_signals<F, Fut>(mut next_signal: F, cancel: CancellationToken)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    next_signal().await;
    warn!("Shutting down...");
    cancel.cancel();

    next_signal().await;
    warn!("Second shutdown signal received. Not waiting for in-flight alerts.");
}
