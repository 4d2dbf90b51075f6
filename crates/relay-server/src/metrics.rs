//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_core::BatchReport;
use relay_protocol::Partition;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
    pub const MESSAGES_TOTAL: &str = "relay_messages_total";
    pub const MESSAGES_BYTES: &str = "relay_messages_bytes";
    pub const AUTH_FAILURES_TOTAL: &str = "relay_auth_failures_total";
    pub const CHANGE_RECORDS_TOTAL: &str = "relay_change_records_total";
    pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
    pub const LATENCY_SECONDS: &str = "relay_latency_seconds";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of accepted connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of socket messages");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of socket messages");
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Rejected handshakes and messages, by reason"
    );
    metrics::describe_counter!(
        names::CHANGE_RECORDS_TOTAL,
        "Change records processed, by outcome"
    );
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Pushes to connections, by outcome");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Processing latency in seconds, by operation"
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

/// Record a new connection.
pub fn record_connection(partition: Partition) {
    counter!(names::CONNECTIONS_TOTAL, "partition" => partition.as_str()).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record a rejected handshake or message.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Record the outcome of one change batch.
pub fn record_batch(report: &BatchReport) {
    let records = [
        ("broadcast", report.broadcast),
        ("unknown_table", report.skipped_unknown_table),
        ("no_after_image", report.skipped_no_after_image),
        ("malformed", report.skipped_malformed),
        ("failed", report.failed),
    ];
    for (outcome, count) in records {
        counter!(names::CHANGE_RECORDS_TOTAL, "outcome" => outcome).increment(count as u64);
    }

    let deliveries = [
        ("delivered", report.deliveries.delivered),
        ("pruned", report.deliveries.pruned),
        ("failed", report.deliveries.failed),
    ];
    for (outcome, count) in deliveries {
        counter!(names::DELIVERIES_TOTAL, "outcome" => outcome).increment(count as u64);
    }
}

/// Record processing latency.
pub fn record_latency(operation: &'static str, seconds: f64) {
    histogram!(names::LATENCY_SECONDS, "operation" => operation).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new(partition: Partition) -> Self {
        record_connection(partition);
        Self
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
