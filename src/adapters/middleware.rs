//! Request middleware composed onto every router.
//!
//! [`MiddlewareChain`] fixes the order: stats, request logging, panic
//! recovery, tracing, then the optional request-id tagger. Recovery wraps
//! everything after it; stats and logging sit outside it and are not
//! panic-protected.
use std::any::Any;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::Instrument;

use crate::metrics::{RequestTimer, StatsClient};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The fixed middleware stack applied to each freshly built router.
#[derive(Debug, Clone)]
pub struct MiddlewareChain {
    stats: StatsClient,
    tls: bool,
    request_id: bool,
}

impl MiddlewareChain {
    pub fn new(stats: StatsClient, tls: bool, request_id: bool) -> Self {
        Self {
            stats,
            tls,
            request_id,
        }
    }

    /// Wrap `router` with the chain. Layers added later sit further out, so
    /// they are applied innermost first.
    pub fn apply(&self, router: axum::Router) -> axum::Router {
        let mut router = router;

        if self.request_id {
            router = router.layer(middleware::from_fn(request_id_middleware));
        }

        let scheme = if self.tls { "https" } else { "http" };
        router = router.layer(TraceLayer::new_for_http().make_span_with(
            move |req: &Request| {
                tracing::info_span!(
                    "request",
                    http.method = %req.method(),
                    http.path = %req.uri().path(),
                    http.scheme = scheme,
                )
            },
        ));

        router = router.layer(CatchPanicLayer::custom(recover_from_panic));
        router = router.layer(middleware::from_fn(request_logging_middleware));
        router.layer(middleware::from_fn_with_state(
            self.stats.clone(),
            stats_middleware,
        ))
    }
}

/// Count requests and record latency per method/status.
pub async fn stats_middleware(State(stats): State<StatsClient>, req: Request, next: Next) -> Response {
    let timer = RequestTimer::start();
    let method = req.method().clone();

    let response = next.run(req).await;
    stats.track_request(method.as_str(), response.status().as_u16(), timer.elapsed());

    response
}

/// Log start/end of a request including latency.
pub async fn request_logging_middleware(req: Request, next: Next) -> Response {
    let timer = RequestTimer::start();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let version = req.version();

    tracing::debug!("Started processing {} {} {:?}", method, uri, version);

    let response = next.run(req).await;

    tracing::info!(
        "Completed {} {} {:?} - {} in {:?}",
        method,
        uri,
        version,
        response.status(),
        timer.elapsed()
    );

    response
}

/// Convert a panic in route dispatch into a JSON 500.
fn recover_from_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    tracing::error!(panic = %detail, "Recovered from panic while serving request");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal server error" })),
    )
        .into_response()
}

/// Tag the request with an `X-Request-ID` (reusing an inbound one) and echo it
/// on the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let span = tracing::info_span!("request_id", request_id = %request_id);
    let mut response = next.run(req).instrument(span).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
