//! Runtime core: route model, routers, reconfiguration and server lifecycle.
pub mod api;
pub mod events;
pub mod load_balancer;
pub mod reconfigure;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod watch_loop;

pub use api::{ApiDefinitions, ApiSpec, ConfigurationChanged};
pub use events::{EventBus, LifecycleEvent, ReloadEvent, StartupEvent};
pub use router::{LiveHandler, Router, RouterBuilder};
pub use server::{Server, ServerBuilder, ServerState};
