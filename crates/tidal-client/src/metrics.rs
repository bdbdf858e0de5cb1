//! Metrics collection and export for the Tidal client.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tidal_core::ReconcilerStats;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTED: &str = "tidal_connected";
    pub const RECORDS: &str = "tidal_records";
    pub const STORE_UPDATES_TOTAL: &str = "tidal_store_updates_total";
    pub const CHANGES_TOTAL: &str = "tidal_changes_total";
    pub const SUBSCRIPTIONS_TOTAL: &str = "tidal_subscriptions_total";
    pub const ERRORS_TOTAL: &str = "tidal_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_gauge!(names::CONNECTED, "Whether the sync connection is up");
    metrics::describe_gauge!(names::RECORDS, "Records currently held in the local store");
    metrics::describe_counter!(
        names::STORE_UPDATES_TOTAL,
        "Number of observed store changes"
    );
    metrics::describe_counter!(
        names::CHANGES_TOTAL,
        "Change events handled by the reconciler, by outcome"
    );
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Push subscriptions opened"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a store change.
pub fn record_store_update(records: usize) {
    counter!(names::STORE_UPDATES_TOTAL).increment(1);
    gauge!(names::RECORDS).set(records as f64);
}

/// Publish reconciler counters.
pub fn record_reconciler(stats: ReconcilerStats) {
    counter!(names::CHANGES_TOTAL, "outcome" => "applied").absolute(stats.applied);
    counter!(names::CHANGES_TOTAL, "outcome" => "ignored").absolute(stats.ignored);
    counter!(names::CHANGES_TOTAL, "outcome" => "malformed").absolute(stats.malformed);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that marks the connection down on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, marking the connection up.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::CONNECTED).set(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTED).set(0.0);
    }
}
