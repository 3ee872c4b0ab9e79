use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioTimer},
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Connection pool tuning for upstream traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    /// Time allowed for the upstream to return response headers
    pub response_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_idle_per_host: 500,
            idle_timeout: Duration::from_secs(90),
            response_timeout: Duration::from_secs(30),
        }
    }
}

/// Upstream HTTP client using Hyper with Rustls.
///
/// One adapter (and therefore one pool) is shared by every route of a
/// registry, so idle connections survive reloads.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    response_timeout: Duration,
}

impl HttpClientAdapter {
    pub fn new(options: PoolOptions) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(options.max_idle_per_host)
            .pool_idle_timeout(options.idle_timeout)
            .build::<_, AxumBody>(https_connector);

        tracing::debug!(
            max_idle_per_host = options.max_idle_per_host,
            idle_timeout = ?options.idle_timeout,
            "Created upstream HTTP client"
        );
        Ok(Self {
            client,
            response_timeout: options.response_timeout,
        })
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        if req.uri().host().is_none() {
            return Err(HttpClientError::InvalidRequest(format!(
                "Outgoing URI has no host: {}",
                req.uri()
            )));
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let outgoing = Request::from_parts(parts, body);

        tracing::debug!("Forwarding {} {}", method, uri);

        match timeout(self.response_timeout, self.client.request(outgoing)).await {
            Ok(Ok(response)) => {
                let (mut parts, body) = response.into_parts();
                // The body is re-framed downstream.
                parts.headers.remove(header::TRANSFER_ENCODING);
                Ok(Response::from_parts(parts, AxumBody::new(body)))
            }
            Ok(Err(e)) => {
                tracing::warn!("Upstream request {} {} failed: {}", method, uri, e);
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!(
                    "Upstream request {} {} timed out after {:?}",
                    method,
                    uri,
                    self.response_timeout
                );
                Err(HttpClientError::Timeout(self.response_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        assert!(HttpClientAdapter::new(PoolOptions::default()).is_ok());
    }

    #[tokio::test]
    async fn test_rejects_uri_without_host() {
        let client = HttpClientAdapter::new(PoolOptions::default()).unwrap();
        let req = Request::builder()
            .uri("/relative")
            .body(AxumBody::empty())
            .unwrap();

        let err = client.send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClientAdapter::new(PoolOptions::default()).unwrap();
        let req = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(AxumBody::empty())
            .unwrap();

        let err = client.send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::ConnectionError(_)));
    }
}
