//! Administrative HTTP API for inspecting and editing API definitions.
//!
//! Runs on its own port with optional TLS and basic auth. Writes go through
//! the provider's [`ApiRepository`] capability; the provider then pushes the
//! new snapshot through the normal watch path.
use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::Serialize;

use crate::{
    adapters::listener::{bind_tcp, load_tls},
    config::{ApiSpecValidator, models::{Credentials, WebConfig}},
    core::{api::ApiSpec, router::LiveHandler},
    ports::config_provider::{ApiRepository, ConfigProvider, ProviderError},
};

#[derive(Clone)]
struct ApiState {
    provider: Arc<dyn ConfigProvider>,
    live: Arc<LiveHandler>,
    read_only: bool,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    started_at: DateTime<Utc>,
    uptime_seconds: i64,
    provider: &'static str,
    read_only: bool,
    router_id: u64,
    routes: Vec<String>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn provider_error(e: ProviderError) -> Response {
    let status = match &e {
        ProviderError::NotFound(_) => StatusCode::NOT_FOUND,
        ProviderError::AlreadyExists(_) => StatusCode::CONFLICT,
        ProviderError::ReadOnly => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_GATEWAY,
    };
    error(status, e.to_string())
}

/// Resolve the writable repository, or the response explaining why not.
fn writable(state: &ApiState) -> Result<&dyn ApiRepository, Response> {
    if state.read_only {
        return Err(error(StatusCode::FORBIDDEN, "management API is read only"));
    }
    state.provider.as_repository().ok_or_else(|| {
        error(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("provider '{}' does not accept writes", state.provider.name()),
        )
    })
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let router = state.live.current();
    Json(StatusResponse {
        status: "ok",
        started_at: state.started_at,
        uptime_seconds: (Utc::now() - state.started_at).num_seconds(),
        provider: state.provider.name(),
        read_only: state.read_only,
        router_id: router.id(),
        routes: router.route_names(),
    })
}

async fn list_apis(State(state): State<ApiState>) -> Response {
    match state.provider.find_all().await {
        Ok(apis) => Json(apis).into_response(),
        Err(e) => provider_error(e),
    }
}

async fn get_api(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.provider.find_all().await {
        Ok(apis) => match apis.into_iter().find(|api| api.name == name) {
            Some(api) => Json(api).into_response(),
            None => provider_error(ProviderError::NotFound(name)),
        },
        Err(e) => provider_error(e),
    }
}

async fn create_api(State(state): State<ApiState>, Json(spec): Json<ApiSpec>) -> Response {
    let repo = match writable(&state) {
        Ok(repo) => repo,
        Err(response) => return response,
    };
    if let Err(e) = ApiSpecValidator::validate(&spec) {
        return error(StatusCode::BAD_REQUEST, e.to_string());
    }

    let name = spec.name.clone();
    match repo.add(spec).await {
        Ok(()) => {
            tracing::info!(api = %name, "API created through management API");
            let mut response = StatusCode::CREATED.into_response();
            if let Ok(location) = HeaderValue::from_str(&format!("/apis/{name}")) {
                response.headers_mut().insert(header::LOCATION, location);
            }
            response
        }
        Err(e) => provider_error(e),
    }
}

async fn update_api(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(spec): Json<ApiSpec>,
) -> Response {
    let repo = match writable(&state) {
        Ok(repo) => repo,
        Err(response) => return response,
    };
    if let Err(e) = ApiSpecValidator::validate(&spec) {
        return error(StatusCode::BAD_REQUEST, e.to_string());
    }

    match repo.update(&name, spec).await {
        Ok(()) => {
            tracing::info!(api = %name, "API updated through management API");
            StatusCode::OK.into_response()
        }
        Err(e) => provider_error(e),
    }
}

async fn delete_api(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    let repo = match writable(&state) {
        Ok(repo) => repo,
        Err(response) => return response,
    };

    match repo.remove(&name).await {
        Ok(()) => {
            tracing::info!(api = %name, "API removed through management API");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => provider_error(e),
    }
}

fn credentials_match(header_value: &str, expected: &Credentials) -> bool {
    let Some(encoded) = header_value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    match decoded.split_once(':') {
        Some((user, pass)) => user == expected.username && pass == expected.password,
        None => false,
    }
}

async fn basic_auth(State(expected): State<Arc<Credentials>>, req: Request, next: Next) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| credentials_match(v, &expected));

    if !authorized {
        let mut response = error(StatusCode::UNAUTHORIZED, "authentication required");
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"switchyard\""),
        );
        return response;
    }

    next.run(req).await
}

/// Build the management router.
pub fn router(
    config: &WebConfig,
    provider: Arc<dyn ConfigProvider>,
    live: Arc<LiveHandler>,
) -> Router {
    let state = ApiState {
        provider,
        live,
        read_only: config.read_only,
        started_at: Utc::now(),
    };

    let mut app = Router::new()
        .route("/status", get(status))
        .route("/apis", get(list_apis).post(create_api))
        .route("/apis/{name}", get(get_api).put(update_api).delete(delete_api))
        .with_state(state);

    if let Some(credentials) = &config.credentials {
        app = app.layer(middleware::from_fn_with_state(
            Arc::new(credentials.clone()),
            basic_auth,
        ));
    }

    app
}

/// A bound, not yet serving, management API.
pub struct ManagementApi {
    listener: std::net::TcpListener,
    tls: Option<RustlsConfig>,
    app: Router,
    local_addr: SocketAddr,
}

impl ManagementApi {
    pub async fn bind(
        host: &str,
        config: &WebConfig,
        provider: Arc<dyn ConfigProvider>,
        live: Arc<LiveHandler>,
    ) -> Result<Self> {
        let tls = match &config.tls {
            Some(tls) => Some(load_tls(&tls.cert_file, &tls.key_file).await?),
            None => None,
        };
        let listener = bind_tcp(&format!("{host}:{}", config.port))?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            tls = tls.is_some(),
            read_only = config.read_only,
            auth = config.credentials.is_some(),
            "Management API bound"
        );

        Ok(Self {
            listener,
            tls,
            app: router(config, provider, live),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn serve(self) -> (ManagementHandle, impl Future<Output = io::Result<()>> + Send + 'static) {
        let handle = Handle::new();
        let server_handle = handle.clone();
        let service = self.app.into_make_service();
        let listener = self.listener;
        let tls = self.tls;

        let serve = async move {
            match tls {
                Some(tls) => {
                    axum_server::from_tcp_rustls(listener, tls)
                        .handle(server_handle)
                        .serve(service)
                        .await
                }
                None => {
                    axum_server::from_tcp(listener)
                        .handle(server_handle)
                        .serve(service)
                        .await
                }
            }
        };

        (ManagementHandle { handle }, serve)
    }
}

#[derive(Clone)]
pub struct ManagementHandle {
    handle: Handle,
}

impl ManagementHandle {
    pub fn drain(&self, grace: Duration) {
        self.handle.graceful_shutdown(Some(grace));
    }

    pub fn close(&self) {
        self.handle.shutdown();
    }
}
