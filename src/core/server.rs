//! Server controller.
//!
//! Owns the runtime pieces of one gateway process: traffic listeners, the
//! management API, the watch loop task and the cancellation watcher. Two
//! teardown paths exist. [`Server::stop`] drains connections cooperatively;
//! [`Server::close`] tears everything down at once under the hard deadline.
//! Both go through one gate, so whichever runs first owns teardown and the
//! other returns without touching anything.
use std::{
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::{Result, WrapErr};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::{
        listener::{ListenerHandles, ListenerManager},
        management_api::{ManagementApi, ManagementHandle},
    },
    config::GlobalConfig,
    core::{
        events::EventBus,
        reconfigure::Reconfigurator,
        router::{LiveHandler, RouterBuilder},
        shutdown::{ProcessHook, ShutdownSupervisor, abort_process, exit_process},
        watch_loop::{LoopExit, WatchLoop, change_channel},
    },
    metrics::StatsClient,
    ports::{config_provider::ConfigProvider, plugin::LifecyclePlugin, route_registry::RouteRegistry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Running,
    Draining,
    Closed,
}

pub struct ServerBuilder {
    config: GlobalConfig,
    provider: Arc<dyn ConfigProvider>,
    stats: StatsClient,
    events: EventBus,
    abort_hook: ProcessHook,
    fatal_hook: ProcessHook,
}

impl ServerBuilder {
    pub fn new(config: GlobalConfig, provider: Arc<dyn ConfigProvider>) -> Self {
        Self {
            config,
            provider,
            stats: StatsClient::noop(),
            events: EventBus::new(),
            abort_hook: abort_process(),
            fatal_hook: exit_process(),
        }
    }

    pub fn with_stats(mut self, stats: StatsClient) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn LifecyclePlugin>) -> Self {
        self.events.register(plugin);
        self
    }

    /// Replace the action taken when a hard close overruns its deadline.
    pub fn with_abort_hook(mut self, hook: ProcessHook) -> Self {
        self.abort_hook = hook;
        self
    }

    /// Replace the action taken when a listener fails while serving.
    pub fn with_fatal_hook(mut self, hook: ProcessHook) -> Self {
        self.fatal_hook = hook;
        self
    }

    pub fn build(self) -> Arc<Server> {
        let (state, _) = watch::channel(ServerState::NotStarted);
        Arc::new(Server {
            config: Arc::new(self.config),
            provider: self.provider,
            stats: self.stats,
            events: self.events,
            abort_hook: self.abort_hook,
            fatal_hook: self.fatal_hook,
            state,
            shutdown_claimed: AtomicBool::new(false),
            bound: OnceLock::new(),
            running: Mutex::new(None),
        })
    }
}

/// What `start` bound, readable for the rest of the server's life.
struct Bound {
    local_addr: SocketAddr,
    redirect_addr: Option<SocketAddr>,
    management_addr: SocketAddr,
    live: Arc<LiveHandler>,
    registry: Arc<dyn RouteRegistry>,
}

/// Everything teardown has to stop.
struct Running {
    stop: CancellationToken,
    listeners: ListenerHandles,
    management: ManagementHandle,
    tasks: Vec<JoinHandle<()>>,
}

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!("Server task panicked: {e}");
            }
        }
    }
}

pub struct Server {
    config: Arc<GlobalConfig>,
    provider: Arc<dyn ConfigProvider>,
    stats: StatsClient,
    events: EventBus,
    abort_hook: ProcessHook,
    fatal_hook: ProcessHook,
    state: watch::Sender<ServerState>,
    shutdown_claimed: AtomicBool,
    bound: OnceLock<Bound>,
    running: Mutex<Option<Running>>,
}

impl Server {
    pub fn builder(config: GlobalConfig, provider: Arc<dyn ConfigProvider>) -> ServerBuilder {
        ServerBuilder::new(config, provider)
    }

    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.get().map(|b| b.local_addr)
    }

    pub fn redirect_addr(&self) -> Option<SocketAddr> {
        self.bound.get().and_then(|b| b.redirect_addr)
    }

    pub fn management_addr(&self) -> Option<SocketAddr> {
        self.bound.get().map(|b| b.management_addr)
    }

    pub fn live_handler(&self) -> Option<Arc<LiveHandler>> {
        self.bound.get().map(|b| b.live.clone())
    }

    pub fn registry(&self) -> Option<Arc<dyn RouteRegistry>> {
        self.bound.get().map(|b| b.registry.clone())
    }

    /// Bind every listener, start serving and begin watching the provider.
    ///
    /// Errors here are startup-fatal: nothing is left running when `start`
    /// returns `Err`. Cancelling `cancel` later triggers [`Server::close`]
    /// after the configured grace period.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            claimed = *state == ServerState::NotStarted;
            if claimed {
                *state = ServerState::Starting;
            }
            claimed
        });
        if !claimed {
            eyre::bail!("Server already started");
        }

        let builder = RouterBuilder::new(&self.config, self.stats.clone());
        let listeners = match ListenerManager::bind(&self.config, &builder).await {
            Ok(listeners) => listeners,
            Err(e) => {
                self.set_state(ServerState::Closed);
                return Err(e).wrap_err("Failed to start traffic listeners");
            }
        };
        let management = match ManagementApi::bind(
            &self.config.host,
            &self.config.web,
            self.provider.clone(),
            listeners.live(),
        )
        .await
        {
            Ok(management) => management,
            Err(e) => {
                self.set_state(ServerState::Closed);
                return Err(e).wrap_err("Failed to start management API");
            }
        };

        let live = listeners.live();
        let registry = listeners.registry();
        let _ = self.bound.set(Bound {
            local_addr: listeners.local_addr(),
            redirect_addr: listeners.redirect_addr(),
            management_addr: management.local_addr(),
            live: live.clone(),
            registry: registry.clone(),
        });

        let reconfigurator = Reconfigurator::new(
            self.config.clone(),
            self.stats.clone(),
            registry,
            builder,
            live,
            self.events.clone(),
        )
        .with_session(
            self.provider
                .as_session_provider()
                .map(|s| s.shared_session()),
        );

        let stop = CancellationToken::new();
        let (changes_tx, changes_rx) = change_channel();
        let mut tasks = Vec::with_capacity(3);

        let (listener_handles, serve) = listeners.serve();
        let fatal = self.fatal_hook.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve.await {
                fatal(&format!("Traffic listener failed: {e}"));
            }
        }));

        let (management_handle, serve) = management.serve();
        let fatal = self.fatal_hook.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve.await {
                fatal(&format!("Management API failed: {e}"));
            }
        }));

        let loop_stop = stop.clone();
        tasks.push(tokio::spawn(async move {
            if WatchLoop::new(reconfigurator).run(loop_stop, changes_rx).await
                == LoopExit::ProviderClosed
            {
                tracing::warn!("No further configuration updates; serving the last applied routes");
            }
        }));

        self.spawn_cancellation_watcher(cancel, stop.clone());

        {
            let mut running = self.running.lock().await;
            *running = Some(Running {
                stop: stop.clone(),
                listeners: listener_handles,
                management: management_handle,
                tasks,
            });
        }

        if self.shutdown_claimed.load(Ordering::SeqCst) {
            // A stop or close ran while we were starting and found nothing
            // to tear down yet.
            self.teardown_now().await;
            self.set_state(ServerState::Closed);
            eyre::bail!("Server was shut down while starting");
        }

        if let Err(e) = self.provider.watch(stop, changes_tx).await {
            if self.claim_shutdown("start") {
                self.teardown_now().await;
                self.set_state(ServerState::Closed);
            }
            return Err(eyre::Report::new(e)).wrap_err_with(|| {
                format!(
                    "Failed to start watching the '{}' configuration provider",
                    self.provider.name()
                )
            });
        }

        self.state.send_if_modified(|state| {
            let starting = *state == ServerState::Starting;
            if starting {
                *state = ServerState::Running;
            }
            starting
        });

        tracing::info!(
            addr = ?self.local_addr(),
            management = ?self.management_addr(),
            provider = self.provider.name(),
            "Server started"
        );
        Ok(())
    }

    /// Resolves once the server reaches [`ServerState::Closed`], whichever
    /// path got it there.
    pub async fn wait(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ServerState::Closed).await;
    }

    /// Graceful stop: stop accepting, let open connections finish within
    /// `grace`, then force whatever is left.
    pub async fn stop(&self, grace: Duration) {
        if !self.claim_shutdown("stop") {
            return;
        }
        tracing::info!(grace = ?grace, "Stopping server");
        self.set_state(ServerState::Draining);

        if let Some(running) = self.running.lock().await.take() {
            running.stop.cancel();
            running.listeners.drain(grace);
            running.management.drain(grace);

            let aborts: Vec<_> = running.tasks.iter().map(|t| t.abort_handle()).collect();
            // The listeners force-close at `grace`; allow them a moment to
            // report back before giving up on them.
            let limit = grace + Duration::from_secs(1);
            if tokio::time::timeout(limit, join_all(running.tasks)).await.is_err() {
                tracing::warn!(grace = ?grace, "Drain overran the grace timeout; forcing close");
                running.listeners.close();
                running.management.close();
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        self.set_state(ServerState::Closed);
        tracing::info!("Server stopped");
    }

    /// Hard close under the hard deadline. Runs the abort hook if teardown
    /// does not finish in time.
    pub async fn close(&self) {
        if !self.claim_shutdown("close") {
            return;
        }
        tracing::info!(deadline = ?self.config.hard_shutdown_deadline, "Closing server");
        self.set_state(ServerState::Draining);

        let supervisor =
            ShutdownSupervisor::new(self.config.hard_shutdown_deadline, self.abort_hook.clone());
        let closed = supervisor.supervise(self.teardown_now()).await.is_some();

        self.set_state(ServerState::Closed);
        if closed {
            tracing::info!("Server closed");
        }
    }

    fn claim_shutdown(&self, path: &str) -> bool {
        let claimed = self
            .shutdown_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if !claimed {
            tracing::debug!(path, "Shutdown already in progress");
        }
        claimed
    }

    fn set_state(&self, next: ServerState) {
        self.state.send_replace(next);
    }

    async fn teardown_now(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.stop.cancel();
            running.listeners.close();
            running.management.close();
            join_all(running.tasks).await;
        }
    }

    fn spawn_cancellation_watcher(self: &Arc<Self>, cancel: CancellationToken, stop: CancellationToken) {
        let server = Arc::clone(self);
        let grace = self.config.grace_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = cancel.cancelled() => {
                    tracing::info!(grace = ?grace, "Shutdown requested; closing after grace period");
                    tokio::time::sleep(grace).await;
                    server.close().await;
                }
            }
        });
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state())
            .field("provider", &self.provider.name())
            .field("local_addr", &self.local_addr())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::{
        adapters::config_providers::InMemoryProvider,
        config::models::WebConfig,
        ports::config_provider::{ConfigProvider, ProviderError},
    };

    fn local_config() -> GlobalConfig {
        GlobalConfig::builder()
            .host("127.0.0.1")
            .port(0)
            .grace_timeout(Duration::from_millis(50))
            .web(WebConfig {
                port: 0,
                ..WebConfig::default()
            })
            .build()
    }

    struct BrokenProvider;

    #[async_trait::async_trait]
    impl ConfigProvider for BrokenProvider {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn find_all(&self) -> Result<Vec<crate::core::api::ApiSpec>, ProviderError> {
            Ok(Vec::new())
        }

        async fn watch(
            &self,
            _cancel: CancellationToken,
            _changes: tokio::sync::mpsc::Sender<crate::core::api::ConfigurationChanged>,
        ) -> Result<(), ProviderError> {
            Err(ProviderError::Watch("backend unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let server = Server::builder(local_config(), Arc::new(InMemoryProvider::default())).build();
        server.start(CancellationToken::new()).await.unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert!(server.start(CancellationToken::new()).await.is_err());
        server.stop(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_provider_watch_failure_is_startup_fatal() {
        let server = Server::builder(local_config(), Arc::new(BrokenProvider)).build();
        let err = server.start(CancellationToken::new()).await.unwrap_err();
        assert!(format!("{err:#}").contains("backend unreachable"));
        assert_eq!(server.state(), ServerState::Closed);
        server.wait().await;
    }

    #[tokio::test]
    async fn test_second_shutdown_path_is_a_no_op() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook: ProcessHook = {
            let calls = calls.clone();
            Arc::new(move |_: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let server = Server::builder(local_config(), Arc::new(InMemoryProvider::default()))
            .with_abort_hook(hook)
            .build();
        server.start(CancellationToken::new()).await.unwrap();

        tokio::join!(server.stop(Duration::from_millis(50)), server.close());
        server.wait().await;
        assert_eq!(server.state(), ServerState::Closed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_before_start_closes() {
        let server = Server::builder(local_config(), Arc::new(InMemoryProvider::default())).build();
        server.stop(Duration::from_millis(10)).await;
        assert_eq!(server.state(), ServerState::Closed);
        assert!(server.local_addr().is_none());
    }
}
