//! Metrics collection and exposition.
//!
//! # Metrics
//! - `bridge_rpc_requests_total` (counter): provider calls by method, outcome
//! - `bridge_approvals_total` (counter): approval decisions by outcome
//! - `bridge_unlock_attempts_total` (counter): unlock attempts by result
//! - `bridge_transactions_total` (counter): broadcasts by result
//! - `bridge_pending_requests` (gauge): requests waiting on the user
//! - `bridge_connections` (gauge): connected origins
//! - `bridge_session_unlocked` (gauge): 1 when unlocked, 0 when locked

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rpc_request(method: &str, outcome: &'static str) {
    metrics::counter!(
        "bridge_rpc_requests_total",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_approval(outcome: &'static str) {
    metrics::counter!("bridge_approvals_total", "outcome" => outcome).increment(1);
}

pub fn record_unlock_attempt(result: &'static str) {
    metrics::counter!("bridge_unlock_attempts_total", "result" => result).increment(1);
}

pub fn record_transaction(result: &'static str) {
    metrics::counter!("bridge_transactions_total", "result" => result).increment(1);
}

pub fn record_pending_requests(count: usize) {
    metrics::gauge!("bridge_pending_requests").set(count as f64);
}

pub fn record_connections(count: usize) {
    metrics::gauge!("bridge_connections").set(count as f64);
}

pub fn record_session_unlocked(unlocked: bool) {
    metrics::gauge!("bridge_session_unlocked").set(if unlocked { 1.0 } else { 0.0 });
}
