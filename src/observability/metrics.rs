//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by route and status
//! - `http_request_duration_seconds` (histogram): latency by route
//! - `guard_rate_limited_total` (counter): refusals by tier
//! - `guard_csrf_rejected_total` (counter)
//! - `guard_cooldown_blocked_total` (counter): blocks by kind
//! - `guard_store_errors_total` (counter): store failures by guard
//! - `audit_appends_total` / `audit_append_failures_total` (counters)
//!
//! Recording is a no-op until `init_metrics` installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{extract::MatchedPath, extract::Request, middleware::Next, response::Response};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    let route = route.to_string();
    counter!("http_requests_total", "route" => route.clone(), "status" => status.to_string())
        .increment(1);
    histogram!("http_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(tier: &'static str) {
    counter!("guard_rate_limited_total", "tier" => tier).increment(1);
}

pub fn record_csrf_rejected() {
    counter!("guard_csrf_rejected_total").increment(1);
}

pub fn record_cooldown_blocked(kind: &'static str) {
    counter!("guard_cooldown_blocked_total", "kind" => kind).increment(1);
}

pub fn record_store_error(guard: &'static str) {
    counter!("guard_store_errors_total", "guard" => guard).increment(1);
}

pub fn record_audit_append() {
    counter!("audit_appends_total").increment(1);
}

pub fn record_audit_append_failure() {
    counter!("audit_append_failures_total").increment(1);
}

/// Middleware recording `http_requests_total` under the matched route template.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let response = next.run(request).await;
    record_request(&route, response.status().as_u16(), start);
    response
}
