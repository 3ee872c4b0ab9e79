use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::{
    core::api::{ApiSpec, ConfigurationChanged},
    ports::config_provider::{ApiRepository, ConfigProvider, ProviderError},
};

/// Writable, process-local provider. Every successful write pushes a fresh
/// snapshot to the watcher.
pub struct InMemoryProvider {
    apis: watch::Sender<Vec<ApiSpec>>,
}

impl InMemoryProvider {
    pub fn new(apis: Vec<ApiSpec>) -> Self {
        let (apis, _) = watch::channel(apis);
        Self { apis }
    }

    fn modify<F>(&self, f: F) -> Result<(), ProviderError>
    where
        F: FnOnce(&mut Vec<ApiSpec>) -> Result<(), ProviderError>,
    {
        let mut outcome = Ok(());
        self.apis.send_if_modified(|apis| {
            outcome = f(apis);
            outcome.is_ok()
        });
        outcome
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl ApiRepository for InMemoryProvider {
    async fn find_all(&self) -> Result<Vec<ApiSpec>, ProviderError> {
        Ok(self.apis.borrow().clone())
    }

    async fn find_by_name(&self, name: &str) -> Result<ApiSpec, ProviderError> {
        self.apis
            .borrow()
            .iter()
            .find(|api| api.name == name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn add(&self, spec: ApiSpec) -> Result<(), ProviderError> {
        self.modify(|apis| {
            if apis.iter().any(|api| api.name == spec.name) {
                return Err(ProviderError::AlreadyExists(spec.name));
            }
            apis.push(spec);
            Ok(())
        })
    }

    async fn update(&self, name: &str, spec: ApiSpec) -> Result<(), ProviderError> {
        self.modify(|apis| {
            if spec.name != name && apis.iter().any(|api| api.name == spec.name) {
                return Err(ProviderError::AlreadyExists(spec.name));
            }
            let slot = apis
                .iter_mut()
                .find(|api| api.name == name)
                .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
            *slot = spec;
            Ok(())
        })
    }

    async fn remove(&self, name: &str) -> Result<(), ProviderError> {
        self.modify(|apis| {
            let before = apis.len();
            apis.retain(|api| api.name != name);
            if apis.len() == before {
                return Err(ProviderError::NotFound(name.to_string()));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ConfigProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn find_all(&self) -> Result<Vec<ApiSpec>, ProviderError> {
        ApiRepository::find_all(self).await
    }

    async fn watch(
        &self,
        cancel: CancellationToken,
        changes: mpsc::Sender<ConfigurationChanged>,
    ) -> Result<(), ProviderError> {
        let mut rx = self.apis.subscribe();

        tokio::spawn(async move {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = changes.send(ConfigurationChanged::new(snapshot)) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            // Provider dropped: no more updates.
                            let _ = changes.send(ConfigurationChanged::closed()).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    fn as_repository(&self) -> Option<&dyn ApiRepository> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repository_operations() {
        let provider = InMemoryProvider::default();
        let repo = provider.as_repository().unwrap();

        repo.add(ApiSpec::new("orders", "/orders", "http://orders:8080"))
            .await
            .unwrap();
        assert!(matches!(
            repo.add(ApiSpec::new("orders", "/o", "http://o:1")).await,
            Err(ProviderError::AlreadyExists(_))
        ));

        repo.update(
            "orders",
            ApiSpec::new("orders", "/v2/orders", "http://orders:8080"),
        )
        .await
        .unwrap();
        assert_eq!(
            repo.find_by_name("orders").await.unwrap().proxy.listen_path,
            "/v2/orders"
        );

        repo.remove("orders").await.unwrap();
        assert!(matches!(
            repo.remove("orders").await,
            Err(ProviderError::NotFound(_))
        ));
        assert!(repo.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_pushes_on_start_and_after_writes() {
        let provider = InMemoryProvider::new(vec![ApiSpec::new("a", "/a", "http://a:1")]);
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(100);
        provider.watch(cancel.clone(), tx).await.unwrap();

        let initial = rx.recv().await.unwrap().configurations.unwrap();
        assert_eq!(initial.len(), 1);

        provider
            .add(ApiSpec::new("b", "/b", "http://b:1"))
            .await
            .unwrap();
        let updated = rx.recv().await.unwrap().configurations.unwrap();
        assert_eq!(updated.len(), 2);

        // A failed write does not push.
        assert!(provider.remove("missing").await.is_err());
        cancel.cancel();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_provider_sends_closed() {
        let provider = InMemoryProvider::default();
        let (tx, mut rx) = mpsc::channel(100);
        provider.watch(CancellationToken::new(), tx).await.unwrap();

        assert!(rx.recv().await.unwrap().configurations.is_some());
        drop(provider);
        assert_eq!(rx.recv().await.unwrap(), ConfigurationChanged::closed());
    }
}
