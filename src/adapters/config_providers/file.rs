use std::path::{Path, PathBuf};

use async_trait::async_trait;
use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::loader::load_api_definitions,
    core::api::{ApiSpec, ConfigurationChanged},
    ports::config_provider::{ConfigProvider, ProviderError},
};

/// Provider that reads `{ apis: [...] }` from a local file and re-reads it
/// whenever the file changes.
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(path: &Path) -> Result<Vec<ApiSpec>, ProviderError> {
        load_api_definitions(path)
            .map(|definitions| definitions.apis)
            .map_err(|e| ProviderError::Fetch(format!("{e:#}")))
    }

    fn start_watcher(&self, tx: mpsc::Sender<()>) -> Result<notify::RecommendedWatcher, ProviderError> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| ProviderError::Watch(format!("Invalid definitions path {}", self.path.display())))?
            .to_owned();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if (event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove())
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        tracing::debug!("API definitions file changed: {:?}", event.kind);
                        // A pending signal already covers this change.
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => tracing::error!("File watch error: {:?}", e),
            })
            .map_err(|e| ProviderError::Watch(e.to_string()))?;

        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ProviderError::Watch(format!("Failed to watch {}: {e}", watch_dir.display())))?;

        Ok(watcher)
    }
}

#[async_trait]
impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn find_all(&self) -> Result<Vec<ApiSpec>, ProviderError> {
        Self::read(&self.path)
    }

    async fn watch(
        &self,
        cancel: CancellationToken,
        changes: mpsc::Sender<ConfigurationChanged>,
    ) -> Result<(), ProviderError> {
        let (tx, mut rx) = mpsc::channel(1);
        let watcher = self.start_watcher(tx.clone())?;
        let path = self.path.clone();

        // Initial snapshot.
        let _ = tx.try_send(());

        tokio::spawn(async move {
            // Dropping the watcher stops notifications.
            let _watcher = watcher;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    signal = rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                    }
                }

                let apis = match Self::read(&path) {
                    Ok(apis) => apis,
                    Err(e) => {
                        tracing::warn!("Keeping previous API definitions: {}", e);
                        continue;
                    }
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = changes.send(ConfigurationChanged::new(apis)) => {
                        if sent.is_err() {
                            tracing::debug!("Configuration channel closed, stopping file watch");
                            break;
                        }
                    }
                }
            }
            tracing::debug!("File provider watch finished");
        });

        Ok(())
    }
}
