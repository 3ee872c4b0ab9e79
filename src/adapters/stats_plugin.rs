//! Built-in lifecycle plugin that feeds lifecycle activity into metrics.
use async_trait::async_trait;

use crate::{
    core::{
        api::ApiSpec,
        events::{ReloadEvent, StartupEvent},
    },
    metrics::StatsClient,
    ports::plugin::LifecyclePlugin,
};

#[derive(Debug, Clone)]
pub struct StatsPlugin {
    stats: StatsClient,
}

impl StatsPlugin {
    pub fn new(stats: StatsClient) -> Self {
        Self { stats }
    }

    fn record(&self, event: &'static str, apis: &[ApiSpec]) {
        let active = apis.iter().filter(|api| api.active).count();
        self.stats.track_lifecycle_event(event);
        self.stats.set_active_routes(active);
        tracing::debug!(event, active, "Recorded lifecycle event");
    }
}

#[async_trait]
impl LifecyclePlugin for StatsPlugin {
    fn name(&self) -> &str {
        "stats"
    }

    async fn on_startup(&self, event: &StartupEvent) -> eyre::Result<()> {
        self.record("startup", &event.configurations);
        Ok(())
    }

    async fn on_reload(&self, event: &ReloadEvent) -> eyre::Result<()> {
        self.record("reload", &event.configurations);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reload_with_disabled_stats_is_ok() {
        let plugin = StatsPlugin::new(StatsClient::noop());
        let mut inactive = ApiSpec::new("b", "/b", "http://b:1");
        inactive.active = false;

        let event = ReloadEvent {
            configurations: vec![ApiSpec::new("a", "/a", "http://a:1"), inactive],
        };
        assert!(plugin.on_reload(&event).await.is_ok());
        assert_eq!(plugin.name(), "stats");
    }
}
