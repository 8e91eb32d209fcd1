//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, service
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): rejections by scope
//! - `gateway_circuit_rejected_total` (counter): fail-fast rejections by service
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `gateway_service_health` (gauge): 1=healthy, 0=unhealthy
//! - `gateway_health_probe_duration_seconds` (histogram)
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::schema::RateLimitScope;
use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, service: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("service", service.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: RateLimitScope) {
    counter!("gateway_rate_limited_total", "scope" => scope.as_str()).increment(1);
}

pub fn record_circuit_rejected(service: &str) {
    counter!("gateway_circuit_rejected_total", "service" => service.to_string()).increment(1);
}

pub fn record_circuit_state(service: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    gauge!("gateway_circuit_state", "service" => service.to_string()).set(value);
}

pub fn record_health_probe(service: &str, healthy: bool, latency: Duration) {
    gauge!("gateway_service_health", "service" => service.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
    histogram!("gateway_health_probe_duration_seconds", "service" => service.to_string())
        .record(latency.as_secs_f64());
}
