//! Metrics collection and exposition.
//!
//! # Metrics
//! - `labels_upstream_requests_total` (counter): calls by provider, status class
//! - `labels_retries_total` (counter): retries by provider, reason
//! - `labels_concurrency_target` (gauge): current in-flight cap per provider
//! - `labels_coalescer_batches_total` (counter): batched ancestor calls
//! - `labels_coalescer_keys_total` (counter): ancestor keys by cache result
//! - `labels_items_total` (counter): finished identifiers by result
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - The Prometheus exporter is opt-in (`observability.metrics_address`)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_upstream(provider: &'static str, status: &'static str) {
    counter!("labels_upstream_requests_total", "provider" => provider, "status" => status)
        .increment(1);
}

pub fn record_retry(provider: &'static str, reason: &'static str) {
    counter!("labels_retries_total", "provider" => provider, "reason" => reason).increment(1);
}

pub fn record_concurrency_target(provider: &'static str, target: usize) {
    gauge!("labels_concurrency_target", "provider" => provider).set(target as f64);
}

pub fn record_batch(size: usize) {
    counter!("labels_coalescer_batches_total").increment(1);
    counter!("labels_coalescer_keys_total", "result" => "fetched").increment(size as u64);
}

pub fn record_cache_hit() {
    counter!("labels_coalescer_keys_total", "result" => "cached").increment(1);
}

pub fn record_item(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!("labels_items_total", "result" => result).increment(1);
}
