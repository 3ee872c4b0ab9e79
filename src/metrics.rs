//! Lightweight metrics helpers for Switchyard.
//!
//! This module wraps the `metrics` crate macros behind a small cloneable
//! [`StatsClient`] handle. It intentionally avoids embedding a concrete
//! exporter (the application can install any compatible recorder) while still
//! describing the gateway's metric names.
//!
//! Provided metrics:
//! * `switchyard_requests_total` (counter; labels: method, status)
//! * `switchyard_request_duration_seconds` (histogram; labels: method)
//! * `switchyard_reconfigurations_total` (counter; labels: kind, outcome)
//! * `switchyard_active_routes` (gauge)
//! * `switchyard_lifecycle_events_total` (counter; labels: event)
use std::time::{Duration, Instant};

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::Lazy;

pub const SWITCHYARD_REQUESTS_TOTAL: &str = "switchyard_requests_total";
pub const SWITCHYARD_REQUEST_DURATION_SECONDS: &str = "switchyard_request_duration_seconds";
pub const SWITCHYARD_RECONFIGURATIONS_TOTAL: &str = "switchyard_reconfigurations_total";
pub const SWITCHYARD_ACTIVE_ROUTES: &str = "switchyard_active_routes";
pub const SWITCHYARD_LIFECYCLE_EVENTS_TOTAL: &str = "switchyard_lifecycle_events_total";

static DESCRIBED: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        SWITCHYARD_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests served by the gateway."
    );
    describe_histogram!(
        SWITCHYARD_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests served by the gateway."
    );
    describe_counter!(
        SWITCHYARD_RECONFIGURATIONS_TOTAL,
        Unit::Count,
        "Routing table (re)configurations by kind (startup/reload) and outcome."
    );
    describe_gauge!(
        SWITCHYARD_ACTIVE_ROUTES,
        "Number of routes in the currently installed routing table."
    );
    describe_counter!(
        SWITCHYARD_LIFECYCLE_EVENTS_TOTAL,
        Unit::Count,
        "Lifecycle events delivered to plugins."
    );
});

/// Which reconfiguration path ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigureKind {
    Startup,
    Reload,
}

impl ReconfigureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconfigureKind::Startup => "startup",
            ReconfigureKind::Reload => "reload",
        }
    }
}

/// Cheap, cloneable handle for recording gateway metrics.
///
/// Plugins receive a clone in the startup event so they record through the
/// same facade as the gateway.
#[derive(Debug, Clone, Default)]
pub struct StatsClient {
    enabled: bool,
}

impl StatsClient {
    /// A client that records into the globally installed recorder.
    pub fn new() -> Self {
        Lazy::force(&DESCRIBED);
        Self { enabled: true }
    }

    /// A client that records nothing.
    pub fn noop() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a served request.
    pub fn track_request(&self, method: &str, status: u16, duration: Duration) {
        if !self.enabled {
            return;
        }
        counter!(
            SWITCHYARD_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(
            SWITCHYARD_REQUEST_DURATION_SECONDS,
            "method" => method.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record the outcome of a reconfiguration attempt.
    pub fn track_reconfiguration(&self, kind: ReconfigureKind, success: bool) {
        if !self.enabled {
            return;
        }
        counter!(
            SWITCHYARD_RECONFIGURATIONS_TOTAL,
            "kind" => kind.as_str(),
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
    }

    pub fn set_active_routes(&self, count: usize) {
        if self.enabled {
            gauge!(SWITCHYARD_ACTIVE_ROUTES).set(count as f64);
        }
    }

    pub fn track_lifecycle_event(&self, event: &'static str) {
        if self.enabled {
            counter!(SWITCHYARD_LIFECYCLE_EVENTS_TOTAL, "event" => event).increment(1);
        }
    }
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<StatsClient> {
    tracing::info!("Initializing Switchyard metrics system");
    let client = StatsClient::new();
    tracing::info!("Switchyard metrics system initialized successfully");
    Ok(client)
}
