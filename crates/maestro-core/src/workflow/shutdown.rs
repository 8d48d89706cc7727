//! Cooperative shutdown signal.
//!
//! The engine checks the signal before each group, before each step launch
//! and while sleeping in retry backoff. It never preempts a runner call.

use tokio_util::sync::CancellationToken;

/// Cloneable handle that requests a graceful shutdown of running workflows.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// Trigger this signal on Ctrl+C or SIGTERM.
    ///
    /// Spawns a background listener; must be called inside a tokio runtime.
    pub fn listen_for_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sig) => {
                        sig.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {},
                _ = terminate => {},
                _ = signal.triggered() => return,
            }

            tracing::info!("shutdown requested, finishing current steps");
            signal.trigger();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_is_visible_to_clones() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_triggered());
        signal.trigger();
        assert!(clone.is_triggered());
        clone.triggered().await;
    }

    #[tokio::test]
    async fn test_listener_exits_when_triggered_elsewhere() {
        let signal = ShutdownSignal::new();
        let handle = signal.listen_for_ctrl_c();
        signal.trigger();
        handle.await.unwrap();
    }
}
