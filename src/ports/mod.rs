//! Ports: the traits the runtime core talks to.
pub mod config_provider;
pub mod http_client;
pub mod plugin;
pub mod route_registry;

pub use config_provider::{ApiRepository, ConfigProvider, ProviderError, SessionProvider, SharedSession};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use plugin::LifecyclePlugin;
pub use route_registry::{RegistryError, RouteRegistry};
