//! Configuration provider adapters.
pub mod file;
pub mod http;
pub mod memory;

use std::sync::Arc;

use eyre::Result;

pub use file::FileConfigProvider;
pub use http::HttpConfigProvider;
pub use memory::InMemoryProvider;

use crate::{config::models::ProviderConfig, ports::config_provider::ConfigProvider};

/// Build the provider selected by the process configuration.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn ConfigProvider>> {
    let provider: Arc<dyn ConfigProvider> = match config {
        ProviderConfig::File { path } => Arc::new(FileConfigProvider::new(path)),
        ProviderConfig::Http { url, poll_interval } => {
            Arc::new(HttpConfigProvider::new(url.clone(), *poll_interval)?)
        }
        ProviderConfig::Memory { apis } => Arc::new(InMemoryProvider::new(apis.clone())),
    };
    tracing::info!(provider = provider.name(), "Configured API definitions provider");
    Ok(provider)
}
