//! Metrics collection and exposition.
//!
//! # Metrics
//! - `governance_rate_limited_total` (counter): denied requests by matched policy
//!   (route name, tier or `default`)
//! - `governance_csrf_rejected_total` (counter): rejected tokens by reason
//! - `governance_cache_requests_total` (counter): cache lookups by status
//! - `governance_cache_revalidation_failures_total` (counter)
//! - `governance_tracked_keys` (gauge): live entries per store, updated on sweep
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::cache::CacheStatus;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// `policy` must come from configuration, never from the request path.
pub fn record_rate_limited(policy: &str) {
    metrics::counter!("governance_rate_limited_total", "policy" => policy.to_string()).increment(1);
}

pub fn record_csrf_rejected(reason: &'static str) {
    metrics::counter!("governance_csrf_rejected_total", "reason" => reason).increment(1);
}

pub fn record_cache_lookup(status: CacheStatus) {
    metrics::counter!("governance_cache_requests_total", "status" => status.as_str()).increment(1);
}

pub fn record_revalidation_failure() {
    metrics::counter!("governance_cache_revalidation_failures_total").increment(1);
}

pub fn record_tracked_keys(store: &'static str, count: usize) {
    metrics::gauge!("governance_tracked_keys", "store" => store).set(count as f64);
}
