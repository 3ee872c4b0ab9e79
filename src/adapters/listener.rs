//! Traffic listeners.
//!
//! [`ListenerManager::bind`] opens every socket up front so a port clash or a
//! bad certificate fails `start` instead of surfacing once serving begins. It
//! also creates the first router (empty, answering 404) and the proxy register
//! bound to it. [`ListenerManager::serve`] then hands the sockets to
//! axum-server; the returned [`ListenerHandles`] drive graceful and hard
//! shutdown.
use std::{future::Future, io, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use eyre::{Result, WrapErr};

use crate::{
    adapters::proxy_register::{ProxyRegister, RegisterParams},
    config::GlobalConfig,
    core::router::{LiveHandler, RouterBuilder},
    ports::route_registry::RouteRegistry,
};

/// Bind a listening socket synchronously.
pub fn bind_tcp(addr: &str) -> Result<std::net::TcpListener> {
    let listener =
        std::net::TcpListener::bind(addr).wrap_err_with(|| format!("Failed to bind {addr}"))?;
    listener
        .set_nonblocking(true)
        .wrap_err_with(|| format!("Failed to configure listener on {addr}"))?;
    Ok(listener)
}

/// Load a PEM certificate/key pair for rustls.
pub async fn load_tls(cert_file: &str, key_file: &str) -> Result<RustlsConfig> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    for path in [cert_file, key_file] {
        if !Path::new(path).exists() {
            eyre::bail!("TLS file not found: {path}");
        }
    }
    RustlsConfig::from_pem_file(cert_file, key_file)
        .await
        .wrap_err_with(|| format!("Failed to load TLS key pair {cert_file} / {key_file}"))
}

/// Shutdown handles for the running listeners.
#[derive(Clone)]
pub struct ListenerHandles {
    primary: Handle,
    redirect: Handle,
}

impl ListenerHandles {
    fn new() -> Self {
        Self {
            primary: Handle::new(),
            redirect: Handle::new(),
        }
    }

    /// Stop accepting and let open connections finish; anything still open
    /// after `grace` is closed.
    pub fn drain(&self, grace: Duration) {
        self.primary.graceful_shutdown(Some(grace));
        self.redirect.graceful_shutdown(Some(grace));
    }

    /// Close the listeners and every connection now.
    pub fn close(&self) {
        self.primary.shutdown();
        self.redirect.shutdown();
    }

    pub fn connection_count(&self) -> usize {
        self.primary.connection_count() + self.redirect.connection_count()
    }
}

pub struct ListenerManager {
    live: Arc<LiveHandler>,
    registry: Arc<ProxyRegister>,
    primary: std::net::TcpListener,
    redirect: Option<std::net::TcpListener>,
    tls: Option<RustlsConfig>,
    tls_port: u16,
    local_addr: SocketAddr,
    redirect_addr: Option<SocketAddr>,
}

impl ListenerManager {
    pub async fn bind(config: &GlobalConfig, builder: &RouterBuilder) -> Result<Self> {
        let tls = match (&config.tls.cert_file, &config.tls.key_file) {
            (Some(cert), Some(key)) => Some(load_tls(cert, key).await?),
            _ => None,
        };

        let primary = bind_tcp(&config.serving_addr())?;
        let local_addr = primary.local_addr()?;

        let redirect = match config.redirect_addr() {
            Some(addr) => Some(bind_tcp(&addr)?),
            None => None,
        };
        let redirect_addr = redirect.as_ref().map(|l| l.local_addr()).transpose()?;

        let router = builder.build();
        let registry = Arc::new(ProxyRegister::new(
            router.clone(),
            RegisterParams::from_config(config),
        )?);
        let live = Arc::new(LiveHandler::new(router));

        tracing::info!(
            addr = %local_addr,
            tls = tls.is_some(),
            redirect = ?redirect_addr,
            "Traffic listeners bound"
        );

        Ok(Self {
            live,
            registry,
            primary,
            redirect,
            tls,
            tls_port: local_addr.port(),
            local_addr,
            redirect_addr,
        })
    }

    pub fn live(&self) -> Arc<LiveHandler> {
        self.live.clone()
    }

    pub fn registry(&self) -> Arc<dyn RouteRegistry> {
        self.registry.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn redirect_addr(&self) -> Option<SocketAddr> {
        self.redirect_addr
    }

    /// Start serving. The future resolves once every listener has shut down,
    /// or with the first listener error.
    pub fn serve(self) -> (ListenerHandles, impl Future<Output = io::Result<()>> + Send + 'static) {
        let handles = ListenerHandles::new();
        let tls_port = self.tls_port;

        let service = self.live.service().into_make_service();
        let primary = self.primary;
        let primary_handle = handles.primary.clone();
        let tls = self.tls;
        let main = async move {
            match tls {
                Some(tls) => {
                    axum_server::from_tcp_rustls(primary, tls)
                        .handle(primary_handle)
                        .serve(service)
                        .await
                }
                None => {
                    axum_server::from_tcp(primary)
                        .handle(primary_handle)
                        .serve(service)
                        .await
                }
            }
        };

        let redirect = self.redirect.map(|listener| {
            let handle = handles.redirect.clone();
            let app = redirect_router(tls_port).into_make_service();
            async move { axum_server::from_tcp(listener).handle(handle).serve(app).await }
        });

        let serve = async move {
            match redirect {
                Some(redirect) => tokio::try_join!(main, redirect).map(|_| ()),
                None => main.await,
            }
        };

        (handles, serve)
    }
}

/// Router whose only behavior is a permanent redirect to the HTTPS URL.
pub fn redirect_router(tls_port: u16) -> axum::Router {
    axum::Router::new()
        .fallback(redirect_to_https)
        .with_state(tls_port)
}

async fn redirect_to_https(State(tls_port): State<u16>, req: Request) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())
        .unwrap_or("localhost");
    // Drop any port from the Host header; IPv6 literals keep their brackets.
    let host = match host.rfind(':') {
        Some(i) if !host[i..].contains(']') => &host[..i],
        _ => host,
    };
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let location = if tls_port == 443 {
        format!("https://{host}{path}")
    } else {
        format!("https://{host}:{tls_port}{path}")
    };

    match location.parse::<Uri>() {
        Ok(_) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use tower::ServiceExt;

    use super::*;
    use crate::metrics::StatsClient;

    #[tokio::test]
    async fn test_redirect_keeps_path_and_query() {
        let response = redirect_router(8443)
            .oneshot(
                Request::builder()
                    .uri("/orders/1?expand=true")
                    .header(header::HOST, "gateway.example.com:8080")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://gateway.example.com:8443/orders/1?expand=true"
        );
    }

    #[tokio::test]
    async fn test_redirect_to_default_port() {
        let response = redirect_router(443)
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::HOST, "[::1]:80")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://[::1]/"
        );
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported_synchronously() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let config = GlobalConfig::builder().host("127.0.0.1").port(port).build();
        let builder = RouterBuilder::new(&config, StatsClient::noop());
        let err = ListenerManager::bind(&config, &builder).await.err().unwrap();
        assert!(format!("{err:#}").contains("Failed to bind"));
    }

    #[tokio::test]
    async fn test_missing_certificate_fails_bind() {
        let config = GlobalConfig::builder()
            .host("127.0.0.1")
            .port(0)
            .tls(0, "/nonexistent/cert.pem", "/nonexistent/key.pem")
            .build();
        let builder = RouterBuilder::new(&config, StatsClient::noop());
        let err = ListenerManager::bind(&config, &builder).await.err().unwrap();
        assert!(format!("{err:#}").contains("TLS file not found"));
    }

    #[tokio::test]
    async fn test_serves_not_found_then_drains() {
        let config = GlobalConfig::builder().host("127.0.0.1").port(0).build();
        let builder = RouterBuilder::new(&config, StatsClient::noop());
        let manager = ListenerManager::bind(&config, &builder).await.unwrap();
        let addr = manager.local_addr();

        let (handles, serve) = manager.serve();
        let task = tokio::spawn(serve);

        let response = reqwest::get(format!("http://{addr}/nothing")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        handles.drain(Duration::from_millis(100));
        task.await.unwrap().unwrap();
    }
}
