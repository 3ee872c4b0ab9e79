//! Lifecycle events and the bus that delivers them to plugins.
//!
//! Emission is a synchronous, ordered multicast: plugins are called one after
//! another in registration order and the emitter waits for all of them. A
//! failing plugin is logged and never changes the outcome of the
//! reconfiguration that triggered the event.
use std::sync::Arc;

use crate::{
    config::GlobalConfig,
    core::api::ApiSpec,
    metrics::StatsClient,
    ports::{config_provider::SharedSession, plugin::LifecyclePlugin, route_registry::RouteRegistry},
};

/// Emitted once, on the first accepted snapshot, before any route is
/// materialized.
#[derive(Clone)]
pub struct StartupEvent {
    pub stats: StatsClient,
    pub registry: Arc<dyn RouteRegistry>,
    pub config: Arc<GlobalConfig>,
    pub configurations: Vec<ApiSpec>,
    /// Present when the provider is backed by a session-oriented store
    pub session: Option<SharedSession>,
}

impl std::fmt::Debug for StartupEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupEvent")
            .field("configurations", &self.configurations.len())
            .field("session", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

/// Emitted on every warm reload, after the new router is populated and before
/// it is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadEvent {
    pub configurations: Vec<ApiSpec>,
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Startup(StartupEvent),
    Reload(ReloadEvent),
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::Startup(_) => "startup",
            LifecycleEvent::Reload(_) => "reload",
        }
    }
}

#[derive(Default, Clone)]
pub struct EventBus {
    plugins: Vec<Arc<dyn LifecyclePlugin>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn LifecyclePlugin>) {
        tracing::debug!(plugin = plugin.name(), "Registered lifecycle plugin");
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Deliver `event` to every plugin in registration order.
    pub async fn emit(&self, event: &LifecycleEvent) {
        for plugin in &self.plugins {
            let outcome = match event {
                LifecycleEvent::Startup(e) => plugin.on_startup(e).await,
                LifecycleEvent::Reload(e) => plugin.on_reload(e).await,
            };
            if let Err(e) = outcome {
                tracing::error!(
                    plugin = plugin.name(),
                    event = event.kind(),
                    "Lifecycle plugin failed: {:#}",
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}
