//! Route tables, routers and the live handler reference.
//!
//! A [`Router`] pairs a swappable [`RouteTable`] with its own axum service
//! carrying the fixed middleware chain. Tables are never edited in place: the
//! route registry builds a complete table and stores it in one step, so a
//! request sees either the previous table or the new one, never a mix.
//!
//! [`LiveHandler`] is the single reference the traffic listeners read on every
//! request. Reloads build a fresh [`Router`], populate it, and only then
//! install it here.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;

use crate::{adapters::middleware::MiddlewareChain, config::GlobalConfig, metrics::StatsClient};

static NEXT_ROUTER_ID: AtomicU64 = AtomicU64::new(1);

/// Errors raised while building a route table.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RouteError {
    #[error("route '{name}' conflicts on '{pattern}': {reason}")]
    Conflict {
        name: String,
        pattern: String,
        reason: String,
    },

    #[error("route '{name}' has invalid method '{method}'")]
    InvalidMethod { name: String, method: String },
}

/// Endpoint bound to a route.
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    async fn handle(&self, req: Request) -> Response;
}

pub type BoxRouteHandler = Arc<dyn RouteHandler>;

/// JSON 404 used for unmatched requests and the synthetic catch-all route.
pub struct NotFound;

#[async_trait]
impl RouteHandler for NotFound {
    async fn handle(&self, _req: Request) -> Response {
        not_found_response()
    }
}

pub fn not_found_response() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "no API found with those values" })),
    )
        .into_response()
}

fn method_not_allowed_response(allowed: &[Method]) -> Response {
    let allow = allowed
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let mut response = (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "error": "method not allowed" })),
    )
        .into_response();
    if let Ok(value) = allow.parse() {
        response.headers_mut().insert(header::ALLOW, value);
    }
    response
}

struct RouteEntry {
    name: String,
    methods: Vec<Method>,
    handler: BoxRouteHandler,
}

/// An immutable-once-installed set of path-prefix routes.
pub struct RouteTable {
    matcher: matchit::Router<usize>,
    entries: Vec<RouteEntry>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            matcher: matchit::Router::new(),
            entries: Vec::new(),
        }
    }

    /// Bind `listen_path` and everything below it to `handler`.
    ///
    /// An empty `methods` list allows any method.
    pub fn insert(
        &mut self,
        name: &str,
        listen_path: &str,
        methods: &[String],
        handler: BoxRouteHandler,
    ) -> Result<(), RouteError> {
        let methods = methods
            .iter()
            .map(|m| {
                m.to_ascii_uppercase()
                    .parse::<Method>()
                    .map_err(|_| RouteError::InvalidMethod {
                        name: name.to_string(),
                        method: m.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let base = listen_path.trim_end_matches('/');
        let patterns = if base.is_empty() {
            vec!["/".to_string(), "/{*rest}".to_string()]
        } else {
            vec![base.to_string(), format!("{base}/{{*rest}}")]
        };

        let index = self.entries.len();
        for pattern in patterns {
            self.matcher
                .insert(pattern.clone(), index)
                .map_err(|e| RouteError::Conflict {
                    name: name.to_string(),
                    pattern,
                    reason: e.to_string(),
                })?;
        }

        self.entries.push(RouteEntry {
            name: name.to_string(),
            methods,
            handler,
        });
        Ok(())
    }

    /// Number of routes in the table (the synthetic catch-all counts as one).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Route names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Some matchers fault on an empty table; give an empty table a catch-all
    /// that answers 404.
    fn finish(mut self, not_found: &BoxRouteHandler) -> Self {
        if self.entries.is_empty() {
            // Cannot conflict: the table is empty.
            let _ = self.insert("not-found", "/", &[], not_found.clone());
        }
        self
    }

    fn lookup(&self, path: &str) -> Option<&RouteEntry> {
        let index = match self.matcher.at(path) {
            Ok(matched) => *matched.value,
            Err(_) if path.len() > 1 && path.ends_with('/') => {
                *self.matcher.at(path.trim_end_matches('/')).ok()?.value
            }
            Err(_) => return None,
        };
        self.entries.get(index)
    }
}

#[derive(Clone)]
struct DispatchState {
    table: Arc<ArcSwap<RouteTable>>,
    not_found: BoxRouteHandler,
}

async fn dispatch(State(state): State<DispatchState>, req: Request) -> Response {
    let table = state.table.load_full();
    let Some(entry) = table.lookup(req.uri().path()) else {
        return state.not_found.handle(req).await;
    };

    if !entry.methods.is_empty() && !entry.methods.contains(req.method()) {
        return method_not_allowed_response(&entry.methods);
    }

    entry.handler.handle(req).await
}

/// A route table plus the middleware-wrapped service that dispatches into it.
pub struct Router {
    id: u64,
    table: Arc<ArcSwap<RouteTable>>,
    not_found: BoxRouteHandler,
    service: axum::Router,
}

impl Router {
    fn new(chain: &MiddlewareChain, not_found: BoxRouteHandler) -> Self {
        let table = Arc::new(ArcSwap::from_pointee(
            RouteTable::new().finish(&not_found),
        ));
        let state = DispatchState {
            table: table.clone(),
            not_found: not_found.clone(),
        };
        let inner = axum::Router::new().fallback(dispatch).with_state(state);

        Self {
            id: NEXT_ROUTER_ID.fetch_add(1, Ordering::Relaxed),
            table,
            not_found,
            service: chain.apply(inner),
        }
    }

    /// Process-unique identifier, useful in logs and tests.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Replace every route binding in one store.
    pub fn replace_table(&self, table: RouteTable) {
        self.table.store(Arc::new(table.finish(&self.not_found)));
    }

    pub fn routes_count(&self) -> usize {
        self.table.load().len()
    }

    pub fn route_names(&self) -> Vec<String> {
        self.table.load().names()
    }

    /// The middleware-wrapped service for this router.
    pub fn service(&self) -> axum::Router {
        self.service.clone()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("routes", &self.route_names())
            .finish()
    }
}

/// Produces fresh routers with the fixed middleware chain and not-found handler.
#[derive(Clone)]
pub struct RouterBuilder {
    chain: MiddlewareChain,
    not_found: BoxRouteHandler,
}

impl RouterBuilder {
    pub fn new(config: &GlobalConfig, stats: StatsClient) -> Self {
        Self {
            chain: MiddlewareChain::new(stats, config.tls.is_https(), config.request_id),
            not_found: Arc::new(NotFound),
        }
    }

    /// Replace the default JSON 404 handler.
    pub fn with_not_found(mut self, handler: BoxRouteHandler) -> Self {
        self.not_found = handler;
        self
    }

    pub fn build(&self) -> Arc<Router> {
        Arc::new(Router::new(&self.chain, self.not_found.clone()))
    }
}

/// The request-dispatch entry point shared by every traffic listener.
pub struct LiveHandler {
    current: ArcSwap<Router>,
}

impl LiveHandler {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            current: ArcSwap::new(router),
        }
    }

    /// Atomically publish `router`. Requests already dispatched to the
    /// previous router finish against it.
    pub fn install(&self, router: Arc<Router>) {
        let previous = self.current.swap(router);
        tracing::debug!(
            previous = previous.id(),
            current = self.current.load().id(),
            "Installed new router"
        );
    }

    pub fn current(&self) -> Arc<Router> {
        self.current.load_full()
    }

    /// Top-level service handed to the listeners. Each request reads the live
    /// router exactly once.
    pub fn service(self: &Arc<Self>) -> axum::Router {
        axum::Router::new()
            .fallback(serve_live)
            .with_state(self.clone())
    }
}

async fn serve_live(State(live): State<Arc<LiveHandler>>, req: Request<Body>) -> Response {
    let router = live.current();
    match router.service().oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}
