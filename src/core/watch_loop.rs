//! Configuration watch loop.
//!
//! Single consumer of the bounded change channel. Owns the current snapshot;
//! snapshots structurally equal to it are dropped, anything else replaces it
//! and is applied inline, so reconfigurations never overlap.
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::{
    api::{ApiSpec, ConfigurationChanged},
    reconfigure::Reconfigure,
};

/// Pending-message bound of the change channel. A provider pushing faster
/// than the loop drains blocks on send.
pub const CHANGE_CHANNEL_CAPACITY: usize = 100;

pub fn change_channel() -> (
    mpsc::Sender<ConfigurationChanged>,
    mpsc::Receiver<ConfigurationChanged>,
) {
    mpsc::channel(CHANGE_CHANNEL_CAPACITY)
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    ProviderClosed,
}

pub struct WatchLoop<R> {
    current: Option<Vec<ApiSpec>>,
    reconfigure: R,
}

impl<R: Reconfigure> WatchLoop<R> {
    pub fn new(reconfigure: R) -> Self {
        Self {
            current: None,
            reconfigure,
        }
    }

    /// Drain `changes` until `stop` fires, the channel closes or the provider
    /// sends its terminal message. Stop wins when both are ready.
    pub async fn run(
        mut self,
        stop: CancellationToken,
        mut changes: mpsc::Receiver<ConfigurationChanged>,
    ) -> LoopExit {
        loop {
            let message = tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    tracing::debug!("Watch loop stopped");
                    return LoopExit::Stopped;
                }
                message = changes.recv() => message,
            };

            let Some(snapshot) = message.and_then(|m| m.configurations) else {
                tracing::info!("Configuration provider closed, watch loop exiting");
                return LoopExit::ProviderClosed;
            };

            if self.current.as_ref() == Some(&snapshot) {
                tracing::debug!(apis = snapshot.len(), "Skipping unchanged configuration");
                continue;
            }

            let snapshot = self.current.insert(snapshot);
            if let Err(e) = self.reconfigure.reconfigure(snapshot).await {
                tracing::error!("Reconfiguration failed: {:#}", eyre::Report::new(e));
            }
        }
    }
}
