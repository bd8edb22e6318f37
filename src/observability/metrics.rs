//! Metrics collection and exposition.
//!
//! # Metrics
//! - `apm_transactions_started_total` (counter): by `sampled`
//! - `apm_transactions_ended_total` (counter)
//! - `apm_spans_started_total` / `apm_spans_ended_total` (counters)
//! - `apm_propagation_errors_total` (counter): by `header`
//! - `apm_registry_entries` (gauge): in-flight correlated requests
//! - `apm_registry_evictions_total` (counter)
//! - `apm_reconstructions_total` (counter): by `outcome`
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so tests need no setup
//! - Prometheus exporter is optional and owns its own listener

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_transaction_started(sampled: bool) {
    counter!("apm_transactions_started_total", "sampled" => if sampled { "true" } else { "false" })
        .increment(1);
}

pub fn record_transaction_ended() {
    counter!("apm_transactions_ended_total").increment(1);
}

pub fn record_span_started() {
    counter!("apm_spans_started_total").increment(1);
}

pub fn record_span_ended() {
    counter!("apm_spans_ended_total").increment(1);
}

pub fn record_propagation_error(header: &'static str) {
    counter!("apm_propagation_errors_total", "header" => header).increment(1);
}

pub fn record_registry_size(size: usize) {
    gauge!("apm_registry_entries").set(size as f64);
}

pub fn record_registry_evictions(count: usize) {
    counter!("apm_registry_evictions_total").increment(count as u64);
}

pub fn record_reconstruction(outcome: &'static str) {
    counter!("apm_reconstructions_total", "outcome" => outcome).increment(1);
}
