use std::{any::Any, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::api::{ApiSpec, ConfigurationChanged};

/// Errors surfaced by configuration providers and repositories.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("API '{0}' not found")]
    NotFound(String),

    #[error("API '{0}' already exists")]
    AlreadyExists(String),

    #[error("Provider is read only")]
    ReadOnly,

    #[error("Failed to fetch definitions: {0}")]
    Fetch(String),

    #[error("Failed to watch definitions: {0}")]
    Watch(String),
}

/// A store-specific handle that plugins may share instead of opening their own
/// connection (an HTTP client, a database pool...). Plugins downcast it.
pub type SharedSession = Arc<dyn Any + Send + Sync>;

/// Capability: the provider is backed by a session-oriented store.
pub trait SessionProvider: Send + Sync {
    fn shared_session(&self) -> SharedSession;
}

/// Capability: the provider accepts writes (used by the management API).
#[async_trait]
pub trait ApiRepository: Send + Sync {
    async fn find_all(&self) -> Result<Vec<ApiSpec>, ProviderError>;
    async fn find_by_name(&self, name: &str) -> Result<ApiSpec, ProviderError>;
    async fn add(&self, spec: ApiSpec) -> Result<(), ProviderError>;
    async fn update(&self, name: &str, spec: ApiSpec) -> Result<(), ProviderError>;
    async fn remove(&self, name: &str) -> Result<(), ProviderError>;
}

/// Source of route specification snapshots.
#[async_trait]
pub trait ConfigProvider: Send + Sync + 'static {
    /// Short provider name for logs
    fn name(&self) -> &'static str;

    /// Load the current snapshot once.
    async fn find_all(&self) -> Result<Vec<ApiSpec>, ProviderError>;

    /// Begin pushing complete snapshots into `changes` until `cancel` fires or
    /// the provider runs out of updates. Returns once watching has started;
    /// an `Err` here is a startup failure.
    async fn watch(
        &self,
        cancel: CancellationToken,
        changes: mpsc::Sender<ConfigurationChanged>,
    ) -> Result<(), ProviderError>;

    fn as_session_provider(&self) -> Option<&dyn SessionProvider> {
        None
    }

    fn as_repository(&self) -> Option<&dyn ApiRepository> {
        None
    }
}
