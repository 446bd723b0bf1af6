//! Process-level shutdown signal handling: SIGINT/SIGTERM on unix, `ctrl_c`
//! elsewhere, both cancelling the same token the `Scheduler`'s tick loop
//! awaits.

use tokio_util::sync::CancellationToken;
use vigil_core::vg_info;

/// Wait for a shutdown signal, then cancel `cancel`. Returns once `cancel`
/// has been cancelled, whether by a signal or by some other caller.
pub async fn wait_for_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                vg_info!(sys, signal = "SIGINT", "received signal, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                vg_info!(sys, signal = "SIGTERM", "received signal, initiating graceful shutdown");
            }
            _ = cancel.cancelled() => {
                return;
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                vg_info!(sys, "received shutdown signal, initiating graceful shutdown");
            }
            _ = cancel.cancelled() => {
                return;
            }
        }
    }
    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_immediately_if_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_millis(200), wait_for_signal(cancel))
            .await
            .expect("wait_for_signal must return promptly once cancel is already set");
    }
}
