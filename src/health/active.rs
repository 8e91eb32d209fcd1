//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every enabled service
//! - Write status and latency back to the registry

use std::sync::Weak;
use std::time::{Duration, Instant, SystemTime};

use axum::body::Body;
use axum::http::{header, Method, Request};
use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::health::state::HealthStatus;
use crate::http::client::{upstream_client, UpstreamClient};
use crate::observability::metrics;
use crate::registry::{ServiceEndpoint, ServiceRegistry};

const USER_AGENT: &str = "api-gateway-health-check";
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Probes services over HTTP.
#[derive(Clone)]
pub struct HealthChecker {
    client: UpstreamClient,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            client: upstream_client(),
        }
    }

    /// Probe every enabled service concurrently and wait for all of them.
    /// Returns the number of services probed.
    pub async fn check_all(&self, registry: &ServiceRegistry) -> usize {
        let services = registry.enabled_services();
        let count = services.len();

        join_all(services.iter().map(|service| async move {
            let (status, latency) = self.probe(service).await;

            metrics::record_health_probe(&service.name, status.is_healthy(), latency);

            let previous = registry.record_health(service, status, latency, SystemTime::now());
            if let Some(previous) = previous.filter(|p| *p != status) {
                tracing::info!(
                    service = %service.name,
                    from = %previous,
                    to = %status,
                    latency_ms = latency.as_millis() as u64,
                    "Service health changed"
                );
            }
        }))
        .await;

        count
    }

    /// GET the service's health URL within its timeout. Latency is measured
    /// for every outcome.
    pub async fn probe(&self, service: &ServiceEndpoint) -> (HealthStatus, Duration) {
        let start = Instant::now();
        let url = service.health_url();

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .header(header::USER_AGENT, USER_AGENT);
        for (name, value) in &service.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let request = match builder.body(Body::empty()) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(service = %service.name, url = %url, error = %e, "Failed to build health check request");
                return (HealthStatus::Unhealthy, start.elapsed());
            }
        };

        let status = match time::timeout(service.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                if response.status().is_success() {
                    HealthStatus::Healthy
                } else {
                    tracing::warn!(service = %service.name, status = %response.status(), "Health check failed: non-success status");
                    HealthStatus::Unhealthy
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(service = %service.name, error = %e, "Health check failed: connection error");
                HealthStatus::Unhealthy
            }
            Err(_) => {
                tracing::warn!(service = %service.name, timeout_ms = service.timeout.as_millis() as u64, "Health check failed: timeout");
                HealthStatus::Unhealthy
            }
        };

        (status, start.elapsed())
    }

    /// Probe loop. Wait-then-retick: a slow round delays the next tick
    /// instead of overlapping it.
    async fn run(
        self,
        registry: Weak<ServiceRegistry>,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        let interval = interval.max(MIN_INTERVAL);
        tracing::info!(interval_ms = interval.as_millis() as u64, "Health checking started");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    let Some(registry) = registry.upgrade() else { break };
                    tokio::select! {
                        biased;
                        _ = stop.changed() => break,
                        _ = self.check_all(&registry) => {}
                    }
                }
            }
        }

        tracing::info!("Health checking stopped");
    }
}

/// Handle to a running probe loop, owned by the registry.
pub(crate) struct HealthTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HealthTask {
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(registry: Weak<ServiceRegistry>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(HealthChecker::new().run(registry, interval, stop_rx));
        Self { stop_tx, handle }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop and join it.
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Health check task ended abnormally");
        }
    }
}
