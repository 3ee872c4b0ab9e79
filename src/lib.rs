//! Switchyard - runtime control core for an HTTP API gateway.
//!
//! Switchyard keeps a gateway serving while its routing configuration changes
//! underneath it. A configuration provider pushes full snapshots of API
//! definitions; the watch loop drops snapshots equal to the one already
//! applied and hands the rest to the reconfigurator, which builds a fresh
//! router off to the side and swaps it in atomically once it is fully
//! populated. Requests in flight keep the router they started on.
//!
//! # Features
//! - Cold start and warm reload with `Startup` / `Reload` lifecycle events
//! - Atomic router hot-swap behind a live handler (no partially built tables)
//! - File (watched), HTTP (polled) and in-memory configuration providers
//! - Reverse proxying with round-robin / random upstream selection
//! - HTTP or HTTPS traffic listener with optional HTTP->HTTPS redirect
//! - Management API for inspecting and editing API definitions
//! - Graceful stop and forced close with a hard-deadline abort
//! - Structured tracing and `metrics` facade instrumentation
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use switchyard::{
//!     adapters::InMemoryProvider,
//!     config::GlobalConfig,
//!     core::{ApiSpec, Server},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let provider = Arc::new(InMemoryProvider::new(vec![ApiSpec::new(
//!     "orders",
//!     "/orders",
//!     "http://localhost:3000",
//! )]));
//! let server = Server::builder(GlobalConfig::default(), provider).build();
//!
//! let cancel = CancellationToken::new();
//! server.start(cancel.clone()).await?;
//! // ... later: cancel.cancel() closes the server after the grace period.
//! server.wait().await;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping lifecycle logic inside `core`.
//!
//! # Error Handling
//! Startup paths return `eyre::Result<T>` with `WrapErr` context. Domain
//! failures (route conflicts, invalid specs, provider errors) are `thiserror`
//! enums. A failed reload is logged and leaves the previous router serving.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpClientAdapter, InMemoryProvider, ProxyRegister, StatsPlugin},
    config::GlobalConfig,
    core::{ApiSpec, Server, ServerBuilder, ServerState},
    ports::{ConfigProvider, LifecyclePlugin, RouteRegistry, http_client::HttpClient},
    utils::GracefulShutdown,
};
