use async_trait::async_trait;
use eyre::Result;

use crate::core::events::{ReloadEvent, StartupEvent};

/// Extension point notified on cold start and on every warm reload.
///
/// Hooks run inline on the reconfiguration path and must not block for long.
#[async_trait]
pub trait LifecyclePlugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn on_startup(&self, _event: &StartupEvent) -> Result<()> {
        Ok(())
    }

    async fn on_reload(&self, _event: &ReloadEvent) -> Result<()> {
        Ok(())
    }
}
