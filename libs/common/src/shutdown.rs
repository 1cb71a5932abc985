//! Graceful shutdown utilities
//!
//! Provides unified shutdown signal handling for the service binaries.

use tracing::warn;

/// Wait for a shutdown signal (Ctrl+C, or SIGTERM on Unix)
///
/// Returns the name of the signal that ended the wait so callers can log it.
///
/// # Example
///
/// ```ignore
/// tokio::select! {
///     signal = common::shutdown::wait_for_shutdown() => {
///         info!("Shutdown signal received: {}", signal);
///     }
///     // ... other tasks
/// }
/// ```
pub async fn wait_for_shutdown() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = async {
                match term_signal {
                    Some(mut sig) => {
                        sig.recv().await;
                    },
                    // Without a SIGTERM handler only Ctrl+C ends the wait
                    None => std::future::pending::<()>().await,
                }
            } => "SIGTERM",
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
        "CTRL_C"
    }
}
