pub mod config_providers;
pub mod http_client;
pub mod listener;
pub mod management_api;
pub mod middleware;
pub mod proxy_register;
pub mod stats_plugin;

/// Re-export commonly used types from adapters
pub use config_providers::{FileConfigProvider, HttpConfigProvider, InMemoryProvider, build_provider};
pub use http_client::HttpClientAdapter;
pub use middleware::MiddlewareChain;
pub use proxy_register::{ProxyRegister, RegisterParams};
pub use stats_plugin::StatsPlugin;
