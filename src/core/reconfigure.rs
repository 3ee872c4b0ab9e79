//! Cold start and warm reload.
//!
//! The [`Reconfigurator`] runs inside the watch loop task, so at most one
//! reconfiguration is ever in flight and the `started` flag needs no
//! synchronization.
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::Instrument;

use crate::{
    config::GlobalConfig,
    core::{
        api::ApiSpec,
        events::{EventBus, LifecycleEvent, ReloadEvent, StartupEvent},
        router::{LiveHandler, RouterBuilder},
    },
    metrics::{ReconfigureKind, StatsClient},
    ports::{
        config_provider::SharedSession,
        route_registry::{RegistryError, RouteRegistry},
    },
    tracing_setup::reconfigure_span,
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReconfigureError {
    #[error("cold start failed to materialize routes: {0}")]
    ColdStart(#[source] RegistryError),

    #[error("reload failed to materialize routes, previous router kept: {0}")]
    WarmReload(#[source] RegistryError),
}

/// Applies an accepted snapshot. Implemented by [`Reconfigurator`]; the watch
/// loop is generic over it.
#[async_trait]
pub trait Reconfigure: Send + 'static {
    async fn reconfigure(&mut self, snapshot: &[ApiSpec]) -> Result<(), ReconfigureError>;
}

pub struct Reconfigurator {
    started: bool,
    config: Arc<GlobalConfig>,
    stats: StatsClient,
    registry: Arc<dyn RouteRegistry>,
    router_builder: RouterBuilder,
    live: Arc<LiveHandler>,
    events: EventBus,
    session: Option<SharedSession>,
}

impl Reconfigurator {
    pub fn new(
        config: Arc<GlobalConfig>,
        stats: StatsClient,
        registry: Arc<dyn RouteRegistry>,
        router_builder: RouterBuilder,
        live: Arc<LiveHandler>,
        events: EventBus,
    ) -> Self {
        Self {
            started: false,
            config,
            stats,
            registry,
            router_builder,
            live,
            events,
            session: None,
        }
    }

    /// Attach the provider's shared session to the startup event.
    pub fn with_session(mut self, session: Option<SharedSession>) -> Self {
        self.session = session;
        self
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    async fn cold_start(&mut self, snapshot: &[ApiSpec]) -> Result<(), ReconfigureError> {
        let event = LifecycleEvent::Startup(StartupEvent {
            stats: self.stats.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            configurations: snapshot.to_vec(),
            session: self.session.clone(),
        });
        self.events.emit(&event).await;

        // The registry is still bound to the router the listeners serve.
        let result = self.registry.materialize(snapshot);

        // Startup has been observed; whatever happens next is a reload.
        self.started = true;
        self.stats
            .track_reconfiguration(ReconfigureKind::Startup, result.is_ok());

        let routes = result.map_err(ReconfigureError::ColdStart)?;
        tracing::info!(routes, "Cold start complete");
        Ok(())
    }

    async fn warm_reload(&mut self, snapshot: &[ApiSpec]) -> Result<(), ReconfigureError> {
        let previous = self.registry.router();
        let router = self.router_builder.build();

        self.registry.bind_to(router.clone());
        let routes = match self.registry.materialize(snapshot) {
            Ok(routes) => routes,
            Err(e) => {
                self.registry.bind_to(previous);
                self.stats
                    .track_reconfiguration(ReconfigureKind::Reload, false);
                return Err(ReconfigureError::WarmReload(e));
            }
        };

        self.events
            .emit(&LifecycleEvent::Reload(ReloadEvent {
                configurations: snapshot.to_vec(),
            }))
            .await;

        self.live.install(router);
        self.stats
            .track_reconfiguration(ReconfigureKind::Reload, true);
        tracing::info!(routes, "Reload complete");
        Ok(())
    }
}

#[async_trait]
impl Reconfigure for Reconfigurator {
    async fn reconfigure(&mut self, snapshot: &[ApiSpec]) -> Result<(), ReconfigureError> {
        if self.started {
            let span = reconfigure_span("reload", snapshot.len());
            self.warm_reload(snapshot).instrument(span).await
        } else {
            let span = reconfigure_span("startup", snapshot.len());
            self.cold_start(snapshot).instrument(span).await
        }
    }
}
