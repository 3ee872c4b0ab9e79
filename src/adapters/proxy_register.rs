//! Reverse-proxy route registry.
//!
//! [`ProxyRegister`] turns a snapshot of [`ApiSpec`]s into a complete
//! [`RouteTable`] of [`ProxyHandler`]s and stores it on the bound router in a
//! single step. All handlers of a registry share one upstream connection pool.
use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::{
    Json,
    extract::Request,
    http::{HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use eyre::Result;

use crate::{
    adapters::http_client::{HttpClientAdapter, PoolOptions},
    config::{ApiSpecValidator, GlobalConfig},
    core::{
        api::ApiSpec,
        load_balancer::{Balancer, balancer_for},
        router::{RouteHandler, RouteTable, Router},
    },
    ports::{
        http_client::{HttpClient, HttpClientError},
        route_registry::{RegistryError, RouteRegistry},
    },
};

/// Tuning parameters handed to the registry when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterParams {
    /// Flush cadence for streamed upstream responses. Hyper forwards frames as
    /// they arrive, so this is only reported.
    pub flush_interval: Duration,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub upstream_timeout: Duration,
}

impl RegisterParams {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            flush_interval: config.backend_flush_interval,
            max_idle_conns_per_host: config.max_idle_conns_per_host,
            idle_conn_timeout: config.close_idle_conns_period,
            upstream_timeout: config.upstream_timeout,
        }
    }

    fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_idle_per_host: self.max_idle_conns_per_host,
            idle_timeout: self.idle_conn_timeout,
            response_timeout: self.upstream_timeout,
        }
    }
}

impl Default for RegisterParams {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}

/// A pre-parsed upstream target.
#[derive(Debug, Clone)]
struct Upstream {
    scheme: String,
    authority: String,
    base_path: String,
}

impl Upstream {
    fn parse(api: &str, target: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: String| RegistryError::InvalidUpstream {
            name: api.to_string(),
            target: target.to_string(),
            reason,
        };

        let uri: Uri = target.parse().map_err(|e: axum::http::uri::InvalidUri| invalid(e.to_string()))?;
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| invalid("missing scheme".to_string()))?;
        let authority = uri
            .authority()
            .ok_or_else(|| invalid("missing host".to_string()))?;

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }
}

/// Forwards requests for one API to its upstream targets.
pub struct ProxyHandler {
    name: String,
    listen_path: String,
    upstreams: Vec<Upstream>,
    balancer: Box<dyn Balancer>,
    strip_path: bool,
    append_path: bool,
    preserve_host: bool,
    client: Arc<dyn HttpClient>,
}

impl ProxyHandler {
    fn from_spec(spec: &ApiSpec, client: Arc<dyn HttpClient>) -> Result<Self, RegistryError> {
        let upstreams = spec
            .proxy
            .upstreams
            .targets
            .iter()
            .map(|target| Upstream::parse(&spec.name, target))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: spec.name.clone(),
            listen_path: spec.proxy.listen_path.trim_end_matches('/').to_string(),
            upstreams,
            balancer: balancer_for(spec.proxy.upstreams.balancing),
            strip_path: spec.proxy.strip_path,
            append_path: spec.proxy.append_path,
            preserve_host: spec.proxy.preserve_host,
            client,
        })
    }

    /// Compute the upstream URI for an inbound request URI.
    fn upstream_uri(&self, upstream: &Upstream, inbound: &Uri) -> Result<Uri, axum::http::Error> {
        let mut path = inbound.path();
        if self.strip_path {
            path = path.strip_prefix(self.listen_path.as_str()).unwrap_or(path);
        }

        let path = if self.append_path {
            let sep = if path.starts_with('/') || path.is_empty() { "" } else { "/" };
            format!("{}{sep}{path}", upstream.base_path)
        } else {
            upstream.base_path.clone()
        };
        let path = if path.is_empty() { "/".to_string() } else { path };

        let path_and_query = match inbound.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        Uri::builder()
            .scheme(upstream.scheme.as_str())
            .authority(upstream.authority.as_str())
            .path_and_query(path_and_query)
            .build()
    }
}

fn gateway_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[async_trait]
impl RouteHandler for ProxyHandler {
    async fn handle(&self, req: Request) -> Response {
        let Some(upstream) = self
            .balancer
            .next_index(self.upstreams.len())
            .and_then(|i| self.upstreams.get(i))
        else {
            return gateway_error(StatusCode::BAD_GATEWAY, "no upstream available");
        };

        let (mut parts, body) = req.into_parts();
        let uri = match self.upstream_uri(upstream, &parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(api = %self.name, "Failed to build upstream URI: {}", e);
                return gateway_error(StatusCode::BAD_GATEWAY, "invalid upstream URI");
            }
        };

        if let Some(host) = parts.headers.get(header::HOST).cloned() {
            parts.headers.insert("x-forwarded-host", host);
        }
        if !self.preserve_host {
            // The client fills in the upstream authority.
            parts.headers.remove(header::HOST);
        }
        parts.headers.remove(header::CONNECTION);
        if let Ok(value) = HeaderValue::from_str(&self.name) {
            parts.headers.insert("x-switchyard-api", value);
        }
        parts.uri = uri;

        match self.client.send_request(Request::from_parts(parts, body)).await {
            Ok(response) => response,
            Err(HttpClientError::Timeout(_)) => {
                gateway_error(StatusCode::GATEWAY_TIMEOUT, "upstream timed out")
            }
            Err(e) => {
                tracing::warn!(api = %self.name, "Upstream error: {}", e);
                gateway_error(StatusCode::BAD_GATEWAY, "upstream unavailable")
            }
        }
    }
}

/// Route registry that installs reverse-proxy handlers on a bound router.
pub struct ProxyRegister {
    router: ArcSwap<Router>,
    client: Arc<dyn HttpClient>,
    params: RegisterParams,
}

impl ProxyRegister {
    /// Create a registry bound to `router` with its own upstream pool.
    pub fn new(router: Arc<Router>, params: RegisterParams) -> Result<Self> {
        let client = Arc::new(HttpClientAdapter::new(params.pool_options())?);
        Ok(Self::with_client(router, params, client))
    }

    pub fn with_client(router: Arc<Router>, params: RegisterParams, client: Arc<dyn HttpClient>) -> Self {
        tracing::debug!(
            flush_interval = ?params.flush_interval,
            max_idle_conns_per_host = params.max_idle_conns_per_host,
            idle_conn_timeout = ?params.idle_conn_timeout,
            "Created proxy register"
        );
        Self {
            router: ArcSwap::new(router),
            client,
            params,
        }
    }

    pub fn params(&self) -> RegisterParams {
        self.params
    }
}

impl RouteRegistry for ProxyRegister {
    fn bind_to(&self, router: Arc<Router>) {
        tracing::debug!(router = router.id(), "Binding proxy register to router");
        self.router.store(router);
    }

    fn router(&self) -> Arc<Router> {
        self.router.load_full()
    }

    fn materialize(&self, specs: &[ApiSpec]) -> Result<usize, RegistryError> {
        ApiSpecValidator::validate_snapshot(specs)?;

        let mut table = RouteTable::new();
        for spec in specs.iter().filter(|s| s.active) {
            let handler = ProxyHandler::from_spec(spec, self.client.clone())?;
            table.insert(
                &spec.name,
                &spec.proxy.listen_path,
                &spec.proxy.methods,
                Arc::new(handler),
            )?;
            tracing::debug!(api = %spec.name, listen_path = %spec.proxy.listen_path, "Registered API");
        }

        let count = table.len();
        let router = self.router.load_full();
        router.replace_table(table);
        tracing::info!(router = router.id(), routes = count, "Materialized routes");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::{core::router::RouterBuilder, metrics::StatsClient};

    /// Records the forwarded request and answers from a script.
    struct RecordingClient {
        seen: Mutex<Vec<(String, Option<String>)>>,
        reply: fn() -> Result<axum::http::Response<Body>, HttpClientError>,
    }

    impl RecordingClient {
        fn new(reply: fn() -> Result<axum::http::Response<Body>, HttpClientError>) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                reply,
            })
        }

        fn seen(&self) -> Vec<(String, Option<String>)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(
            &self,
            req: axum::http::Request<Body>,
        ) -> Result<axum::http::Response<Body>, HttpClientError> {
            let host = req
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.seen.lock().unwrap().push((req.uri().to_string(), host));
            (self.reply)()
        }
    }

    fn ok_reply() -> Result<axum::http::Response<Body>, HttpClientError> {
        Ok(axum::http::Response::new(Body::from("upstream")))
    }

    fn register(client: Arc<RecordingClient>) -> ProxyRegister {
        let router = RouterBuilder::new(&GlobalConfig::default(), StatsClient::noop()).build();
        ProxyRegister::with_client(router, RegisterParams::default(), client)
    }

    fn get(uri: &str) -> Request {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "gateway.local")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_materialize_and_forward() {
        let client = RecordingClient::new(ok_reply);
        let register = register(client.clone());

        let count = register
            .materialize(&[
                ApiSpec::new("orders", "/orders", "http://orders:8080/v1"),
                ApiSpec::new("users", "/users", "http://users:8080").with_strip_path(true),
            ])
            .unwrap();
        assert_eq!(count, 2);

        let service = register.router().service();
        let response = service.clone().oneshot(get("/orders/7?x=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"upstream");

        service.oneshot(get("/users/42")).await.unwrap();

        let seen = client.seen();
        assert_eq!(seen[0].0, "http://orders:8080/v1/orders/7?x=1");
        assert_eq!(seen[0].1, None);
        assert_eq!(seen[1].0, "http://users:8080/42");
    }

    #[tokio::test]
    async fn test_preserve_host_and_no_append() {
        let client = RecordingClient::new(ok_reply);
        let register = register(client.clone());

        let mut spec = ApiSpec::new("static", "/static", "http://cdn:9000/assets");
        spec.proxy.preserve_host = true;
        spec.proxy.append_path = false;
        register.materialize(&[spec]).unwrap();

        register
            .router()
            .service()
            .oneshot(get("/static/logo.png"))
            .await
            .unwrap();

        let seen = client.seen();
        assert_eq!(seen[0].0, "http://cdn:9000/assets");
        assert_eq!(seen[0].1.as_deref(), Some("gateway.local"));
    }

    #[tokio::test]
    async fn test_upstream_errors_map_to_gateway_statuses() {
        let refused = register(RecordingClient::new(|| {
            Err(HttpClientError::ConnectionError("refused".to_string()))
        }));
        refused
            .materialize(&[ApiSpec::new("a", "/a", "http://a:1")])
            .unwrap();
        let response = refused.router().service().oneshot(get("/a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let slow = register(RecordingClient::new(|| {
            Err(HttpClientError::Timeout(Duration::from_secs(1)))
        }));
        slow.materialize(&[ApiSpec::new("b", "/b", "http://b:1")])
            .unwrap();
        let response = slow.router().service().oneshot(get("/b")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_failed_materialize_leaves_table_untouched() {
        let register = register(RecordingClient::new(ok_reply));
        register
            .materialize(&[ApiSpec::new("orders", "/orders", "http://orders:8080")])
            .unwrap();

        let err = register
            .materialize(&[
                ApiSpec::new("good", "/good", "http://good:8080"),
                ApiSpec::new("bad", "/bad", "not a url"),
            ])
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSpec(_)));
        assert_eq!(register.router().route_names(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_inactive_specs_are_skipped_and_rebinding_moves_routes() {
        let register = register(RecordingClient::new(ok_reply));
        let first = register.router();

        let mut inactive = ApiSpec::new("old", "/old", "http://old:8080");
        inactive.active = false;
        register
            .materialize(&[inactive, ApiSpec::new("new", "/new", "http://new:8080")])
            .unwrap();
        assert_eq!(first.route_names(), vec!["new".to_string()]);

        let second = RouterBuilder::new(&GlobalConfig::default(), StatsClient::noop()).build();
        register.bind_to(second.clone());
        register.materialize(&[]).unwrap();

        assert_eq!(second.route_names(), vec!["not-found".to_string()]);
        assert_eq!(first.route_names(), vec!["new".to_string()]);
    }
}
