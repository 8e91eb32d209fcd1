//! Circuit breaker for service protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: service assumed down, requests fail fast
//! - Half-Open: a limited number of probes test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: samples >= max_requests and failure ratio >= threshold
//! Open → Half-Open: first can_request after next_retry
//! Half-Open → Closed: max_requests probe successes
//! Half-Open → Open: any probe failure
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global), one mutex each
//! - Fail fast in Open state (no waiting for timeout)
//! - Counters reset on every transition into Closed or Open
//! - Every admitted call yields a permit that records its outcome once
//! - A permit only counts against the state it was admitted in

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::CircuitBreakerSettings;
use crate::observability::metrics;
use crate::registry::ServiceEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerCounts {
    state: CircuitState,
    failures: u32,
    successes: u32,
    /// Probes admitted since entering Half-Open.
    probes: u32,
    last_failure: Option<Instant>,
    next_retry: Option<Instant>,
    /// Start of the current closed-state rolling window.
    window_start: Instant,
    /// Bumped on every transition.
    generation: u64,
}

/// Failure tracking for one service.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    settings: CircuitBreakerSettings,
    counts: Mutex<BreakerCounts>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            service: service.into(),
            settings,
            counts: Mutex::new(BreakerCounts {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                probes: 0,
                last_failure: None,
                next_retry: None,
                window_start: Instant::now(),
                generation: 0,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, BreakerCounts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn can_request(&self) -> bool {
        self.can_request_at(Instant::now())
    }

    /// Whether a call may proceed at `now`. In Open state this is the only
    /// way out: the first call after `next_retry` moves to Half-Open and is
    /// admitted as a probe.
    pub fn can_request_at(&self, now: Instant) -> bool {
        self.admit_at(now).is_some()
    }

    /// Admit one call, returning the generation it was admitted in.
    fn admit_at(&self, now: Instant) -> Option<u64> {
        let mut counts = self.lock();
        let admitted = match counts.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if counts.next_retry.is_some_and(|retry| now > retry) {
                    self.transition(&mut counts, CircuitState::HalfOpen, now);
                    counts.probes = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if counts.probes < self.settings.max_requests {
                    counts.probes += 1;
                    true
                } else {
                    false
                }
            }
        };
        admitted.then_some(counts.generation)
    }

    pub fn record_success(&self) {
        self.record_success_at(Instant::now())
    }

    pub fn record_success_at(&self, now: Instant) {
        let mut counts = self.lock();
        self.on_success(&mut counts, now);
    }

    fn on_success(&self, counts: &mut BreakerCounts, now: Instant) {
        match counts.state {
            CircuitState::Closed => {
                self.roll_window(counts, now);
                counts.failures = 0;
                counts.successes = counts.successes.saturating_add(1);
            }
            CircuitState::HalfOpen => {
                counts.successes += 1;
                if counts.successes >= self.settings.max_requests {
                    self.transition(counts, CircuitState::Closed, now);
                }
            }
            // Result of a call admitted before the circuit opened.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now())
    }

    pub fn record_failure_at(&self, now: Instant) {
        let mut counts = self.lock();
        self.on_failure(&mut counts, now);
    }

    fn on_failure(&self, counts: &mut BreakerCounts, now: Instant) {
        counts.last_failure = Some(now);
        match counts.state {
            CircuitState::Closed => {
                self.roll_window(counts, now);
                counts.failures = counts.failures.saturating_add(1);

                let total = counts.failures.saturating_add(counts.successes);
                let ratio = f64::from(counts.failures) / f64::from(total);
                if total >= self.settings.max_requests && ratio >= self.settings.failure_threshold {
                    self.transition(counts, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(counts, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Admit one call, returning a permit that must report its outcome.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CallPermit> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(self: &Arc<Self>, now: Instant) -> Option<CallPermit> {
        self.admit_at(now).map(|generation| CallPermit {
            breaker: Arc::clone(self),
            generation,
            resolved: false,
        })
    }

    /// Record the outcome of a call admitted in `generation`. Outcomes of
    /// calls that outlived their state are dropped.
    fn resolve(&self, generation: u64, succeeded: bool, now: Instant) -> bool {
        let mut counts = self.lock();
        if counts.generation != generation {
            tracing::debug!(service = %self.service, "Ignoring outcome from a previous circuit state");
            return false;
        }
        if succeeded {
            self.on_success(&mut counts, now);
        } else {
            self.on_failure(&mut counts, now);
        }
        true
    }

    /// Give back a half-open probe slot whose call never completed.
    fn release_probe(&self, generation: u64) {
        let mut counts = self.lock();
        if counts.generation == generation && counts.state == CircuitState::HalfOpen {
            counts.probes = counts.probes.saturating_sub(1);
        }
    }

    fn roll_window(&self, counts: &mut BreakerCounts, now: Instant) {
        if let Some(interval) = self.settings.interval() {
            if now.saturating_duration_since(counts.window_start) >= interval {
                counts.failures = 0;
                counts.successes = 0;
                counts.window_start = now;
            }
        }
    }

    fn transition(&self, counts: &mut BreakerCounts, to: CircuitState, now: Instant) {
        let from = counts.state;
        counts.state = to;
        counts.failures = 0;
        counts.successes = 0;
        counts.probes = 0;
        counts.window_start = now;
        counts.generation = counts.generation.wrapping_add(1);
        counts.next_retry = match to {
            CircuitState::Open => Some(now + self.settings.timeout()),
            CircuitState::Closed => None,
            CircuitState::HalfOpen => counts.next_retry,
        };

        metrics::record_circuit_state(&self.service, to);
        match to {
            CircuitState::Open => tracing::warn!(
                service = %self.service,
                from = %from,
                retry_in_secs = self.settings.timeout_secs,
                "Circuit opened"
            ),
            _ => tracing::info!(service = %self.service, from = %from, to = %to, "Circuit state changed"),
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> BreakerSnapshot {
        let counts = self.lock();
        BreakerSnapshot {
            service: self.service.clone(),
            state: counts.state,
            failures: counts.failures,
            successes: counts.successes,
            last_failure_ms_ago: counts
                .last_failure
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            retry_in_ms: match counts.state {
                CircuitState::Open => counts
                    .next_retry
                    .map(|t| t.saturating_duration_since(now).as_millis() as u64),
                _ => None,
            },
        }
    }

    /// Instant after which an open circuit admits a probe.
    pub fn next_retry(&self) -> Option<Instant> {
        self.lock().next_retry
    }
}

/// Introspection view of a breaker.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_ms_ago: Option<u64>,
    pub retry_in_ms: Option<u64>,
}

/// One admitted call. Resolve with [`success`](Self::success) or
/// [`failure`](Self::failure); dropping it unresolved (the caller went away)
/// hands back its probe slot without counting an outcome. Once the breaker
/// has left the state the permit was admitted in, both are no-ops.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    resolved: bool,
}

impl CallPermit {
    pub fn success(self) {
        self.record(true)
    }

    pub fn failure(self) {
        self.record(false)
    }

    pub fn record(self, succeeded: bool) {
        self.record_at(succeeded, Instant::now());
    }

    /// Returns whether the outcome was counted.
    pub fn record_at(mut self, succeeded: bool, now: Instant) -> bool {
        self.resolved = true;
        self.breaker.resolve(self.generation, succeeded, now)
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.release_probe(self.generation);
        }
    }
}

/// Breakers for all services, keyed by service name.
pub struct CircuitBreakers {
    defaults: ArcSwap<CircuitBreakerSettings>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    pub fn new(defaults: CircuitBreakerSettings) -> Self {
        Self {
            defaults: ArcSwap::from_pointee(defaults),
            breakers: DashMap::new(),
        }
    }

    fn settings_for(&self, service: &ServiceEndpoint) -> CircuitBreakerSettings {
        service
            .circuit_breaker
            .unwrap_or_else(|| **self.defaults.load())
    }

    /// Breaker for `service`, created on first use. A breaker whose settings
    /// no longer match the service's is replaced with a fresh one.
    pub fn get(&self, service: &ServiceEndpoint) -> Arc<CircuitBreaker> {
        let settings = self.settings_for(service);

        if let Some(existing) = self.breakers.get(&service.name) {
            if existing.settings == settings {
                return Arc::clone(existing.value());
            }
        }

        let mut entry = self
            .breakers
            .entry(service.name.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(&service.name, settings)));
        if entry.settings != settings {
            *entry = Arc::new(CircuitBreaker::new(&service.name, settings));
        }
        Arc::clone(entry.value())
    }

    /// Look up an existing breaker without creating one.
    pub fn find(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| Arc::clone(b.value()))
    }

    /// Make the breaker set match `services`: create missing breakers,
    /// adopt new default settings, drop breakers of removed services.
    pub fn sync(&self, defaults: CircuitBreakerSettings, services: &[ServiceEndpoint]) {
        self.defaults.store(Arc::new(defaults));
        self.breakers
            .retain(|name, _| services.iter().any(|s| &s.name == name));
        for service in services {
            self.get(service);
        }
    }

    /// Snapshot of every breaker, sorted by service name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let now = Instant::now();
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|b| b.value().snapshot_at(now))
            .collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl std::fmt::Debug for CircuitBreakers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakers")
            .field("breakers", &self.breakers.len())
            .finish()
    }
}

/// Time left before an open circuit admits a probe.
pub fn retry_after(breaker: &CircuitBreaker, now: Instant) -> Option<Duration> {
    breaker
        .next_retry()
        .filter(|_| breaker.state() == CircuitState::Open)
        .map(|t| t.saturating_duration_since(now))
}
