//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by outcome (allowed, blocked, rate_limited)
//! - `gateway_verdicts_total` (counter): non-Allow verdicts by detector and verdict
//! - `gateway_detector_failures_total` (counter): detector errors and panics
//! - `gateway_blocked_actors` (gauge): active blocks per detector, set by the sweep
//! - `gateway_events_dropped_total` (counter): events lost before export, by reason
//! - `gateway_export_batches_total` (counter): export attempts by result
//! - `gateway_request_duration_seconds` (histogram): time spent in the pipeline
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels are static strings; actor keys never become labels

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(outcome: &'static str, elapsed: Duration) {
    metrics::counter!("gateway_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("gateway_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_verdict(detector: &'static str, verdict: &'static str) {
    metrics::counter!("gateway_verdicts_total", "detector" => detector, "verdict" => verdict)
        .increment(1);
}

pub fn record_detector_failure(detector: &'static str) {
    metrics::counter!("gateway_detector_failures_total", "detector" => detector).increment(1);
}

pub fn set_blocked_actors(detector: &'static str, count: usize) {
    metrics::gauge!("gateway_blocked_actors", "detector" => detector).set(count as f64);
}

pub fn record_events_dropped(reason: &'static str, count: usize) {
    metrics::counter!("gateway_events_dropped_total", "reason" => reason).increment(count as u64);
}

pub fn record_export_batch(result: &'static str) {
    metrics::counter!("gateway_export_batches_total", "result" => result).increment(1);
}
