use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use eyre::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered from code
    Manual,
}

/// Turns OS termination signals into a cancellation of the server context.
#[derive(Clone)]
pub struct GracefulShutdown {
    token: CancellationToken,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The token handed to `Server::start`.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Cancel the context from code. Only the first call has an effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        self.initiate_shutdown(reason);
    }

    /// Wait for SIGINT/SIGTERM (or a manual trigger) and cancel the token.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                self.initiate_shutdown(ShutdownReason::Interrupt);
            }
            res = Self::wait_for_sigterm() => {
                res?;
                tracing::info!("Received SIGTERM, initiating shutdown...");
                self.initiate_shutdown(ShutdownReason::Terminate);
            }
            _ = self.token.cancelled() => {}
        }

        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_sigterm() -> Result<()> {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        sigterm.recv().await;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm() -> Result<()> {
        std::future::pending::<()>().await;
        Ok(())
    }

    fn initiate_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!("Processing shutdown signal: {:?}", reason);
            self.token.cancel();
        } else {
            tracing::warn!("Shutdown already initiated, ignoring signal");
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_trigger_cancels_token() {
        let shutdown = GracefulShutdown::new();
        let token = shutdown.token();
        assert!(!shutdown.is_shutdown_initiated());
        assert!(!token.is_cancelled());

        shutdown.trigger_shutdown(ShutdownReason::Manual);
        assert!(shutdown.is_shutdown_initiated());
        assert!(token.is_cancelled());

        // Second trigger is ignored.
        shutdown.trigger_shutdown(ShutdownReason::Manual);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_signal_handler_returns_after_manual_trigger() {
        let shutdown = GracefulShutdown::new();
        let handler = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.run_signal_handler().await })
        };

        shutdown.trigger_shutdown(ShutdownReason::Manual);
        handler.await.unwrap().unwrap();
    }
}
