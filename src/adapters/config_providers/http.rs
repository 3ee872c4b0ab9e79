use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    core::api::{ApiDefinitions, ApiSpec, ConfigurationChanged},
    ports::config_provider::{ConfigProvider, ProviderError, SessionProvider, SharedSession},
};

/// Provider that polls a remote definitions document (`{ "apis": [...] }`).
///
/// Every successful fetch is pushed, changed or not; the watch loop drops
/// duplicates. The shared `reqwest::Client` is exposed to plugins as the
/// provider session.
pub struct HttpConfigProvider {
    url: String,
    poll_interval: Duration,
    client: Client,
}

impl HttpConfigProvider {
    pub fn new(url: String, poll_interval: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Fetch(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            url,
            poll_interval,
            client,
        })
    }

    async fn fetch(client: &Client, url: &str) -> Result<Vec<ApiSpec>, ProviderError> {
        let response = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::Fetch(e.to_string()))?;
        let definitions = response
            .json::<ApiDefinitions>()
            .await
            .map_err(|e| ProviderError::Fetch(format!("Failed to parse definitions: {e}")))?;
        Ok(definitions.apis)
    }
}

impl SessionProvider for HttpConfigProvider {
    fn shared_session(&self) -> SharedSession {
        std::sync::Arc::new(self.client.clone())
    }
}

#[async_trait]
impl ConfigProvider for HttpConfigProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn find_all(&self) -> Result<Vec<ApiSpec>, ProviderError> {
        Self::fetch(&self.client, &self.url).await
    }

    async fn watch(
        &self,
        cancel: CancellationToken,
        changes: mpsc::Sender<ConfigurationChanged>,
    ) -> Result<(), ProviderError> {
        let client = self.client.clone();
        let url = self.url.clone();
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let apis = match Self::fetch(&client, &url).await {
                    Ok(apis) => apis,
                    Err(e) => {
                        tracing::warn!("Failed to poll remote API definitions: {}", e);
                        continue;
                    }
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = changes.send(ConfigurationChanged::new(apis)) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("HTTP provider polling finished");
        });

        Ok(())
    }

    fn as_session_provider(&self) -> Option<&dyn SessionProvider> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{Json, Router, routing::get};
    use tokio::net::TcpListener;

    use super::*;

    async fn serve(state: Arc<Mutex<ApiDefinitions>>) -> String {
        let app = Router::new().route(
            "/apis",
            get(move || {
                let state = state.clone();
                async move { Json(state.lock().unwrap().clone()) }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/apis")
    }

    #[tokio::test]
    async fn test_polls_and_pushes_every_fetch() {
        let state = Arc::new(Mutex::new(ApiDefinitions {
            apis: vec![ApiSpec::new("orders", "/orders", "http://orders:8080")],
        }));
        let url = serve(state.clone()).await;

        let provider = HttpConfigProvider::new(url, Duration::from_millis(50)).unwrap();
        assert_eq!(provider.find_all().await.unwrap().len(), 1);

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(100);
        provider.watch(cancel.clone(), tx).await.unwrap();

        let first = rx.recv().await.unwrap().configurations.unwrap();
        let second = rx.recv().await.unwrap().configurations.unwrap();
        assert_eq!(first, second);

        state
            .lock()
            .unwrap()
            .apis
            .push(ApiSpec::new("users", "/users", "http://users:8080"));

        let changed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let apis = rx.recv().await.unwrap().configurations.unwrap();
                if apis.len() == 2 {
                    return apis;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(changed[1].name, "users");

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_exposes_reqwest_session() {
        let provider =
            HttpConfigProvider::new("http://127.0.0.1:1/apis".to_string(), Duration::from_secs(1))
                .unwrap();
        let session = provider
            .as_session_provider()
            .expect("http provider exposes a session")
            .shared_session();
        assert!(session.downcast_ref::<Client>().is_some());
        assert!(provider.as_repository().is_none());
    }
}
