//! Token-bucket rate limiting per scope.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::config::schema::{RateLimitConfig, RateLimitPolicy, RateLimitScope};
use crate::observability::metrics;

const GLOBAL_KEY: &str = "global";

/// Outcome of a single bucket check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed)
    }
}

/// A continuous-refill token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
    }

    /// Refill, then report whether a token is available without taking it.
    fn check(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> RateLimitDecision {
        self.refill(capacity, refill_rate, now);
        if self.tokens >= 1.0 {
            RateLimitDecision::Allowed
        } else {
            RateLimitDecision::Limited {
                retry_after: Duration::from_secs_f64((1.0 - self.tokens) / refill_rate),
            }
        }
    }

    fn take(&mut self) {
        self.tokens -= 1.0;
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> RateLimitDecision {
        let decision = self.check(capacity, refill_rate, now);
        if decision.is_allowed() {
            self.take();
        }
        decision
    }
}

/// Admission control for one policy, one bucket per scope key.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            buckets: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn allow(&self, key: &str) -> RateLimitDecision {
        self.allow_at(key, Instant::now())
    }

    pub fn allow_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        if !self.policy.enabled {
            return RateLimitDecision::Allowed;
        }

        let bucket = self.bucket(key, now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.try_acquire(self.policy.capacity(), self.policy.refill_rate(), now)
    }

    /// The shard lock is released before the caller locks the bucket.
    fn bucket(&self, key: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }
        let capacity = self.policy.capacity();
        Arc::clone(
            self.buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(capacity, now))))
                .value(),
        )
    }

    /// Time for an empty bucket to refill completely.
    pub fn full_refill_time(&self) -> Duration {
        Duration::from_secs_f64(self.policy.capacity() / self.policy.refill_rate())
    }

    /// Drop buckets untouched for `max(idle_ttl, full_refill_time)`. Such a
    /// bucket is already full, so eviction never changes a decision.
    pub fn evict_idle(&self, now: Instant, idle_ttl: Duration) -> usize {
        let ttl = idle_ttl.max(self.full_refill_time());
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| match bucket.try_lock() {
            Ok(bucket) => now.saturating_duration_since(bucket.last_refill) < ttl,
            Err(_) => true,
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn reject(&self, retry_after: Option<Duration>) -> RateLimitRejection {
        metrics::record_rate_limited(self.policy.scope);
        RateLimitRejection {
            policy: self.policy.name.clone(),
            scope: self.policy.scope,
            retry_after,
        }
    }
}

/// Why a request was refused by a scope's limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitRejection {
    pub policy: String,
    pub scope: RateLimitScope,
    /// `None` when a per-user policy saw no identity.
    pub retry_after: Option<Duration>,
}

/// The configured limiters, at most one per scope.
#[derive(Debug, Default)]
pub struct RateLimiters {
    limiters: Vec<RateLimiter>,
    idle_ttl: Duration,
    sweep_interval: Duration,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            limiters: config
                .policies
                .iter()
                .cloned()
                .map(RateLimiter::new)
                .collect(),
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }

    pub fn limiter(&self, scope: RateLimitScope) -> Option<&RateLimiter> {
        self.limiters.iter().find(|l| l.policy.scope == scope)
    }

    pub fn check(&self, client_ip: IpAddr, user: Option<&str>) -> Result<(), RateLimitRejection> {
        self.check_at(client_ip, user, Instant::now())
    }

    /// Consult every enabled limiter; the first refusal in policy order
    /// wins. Tokens are taken only when every scope admits the request, so
    /// a rejection never drains another scope's bucket.
    ///
    /// A per-user policy with no identity fails closed instead of sharing
    /// an anonymous bucket.
    pub fn check_at(
        &self,
        client_ip: IpAddr,
        user: Option<&str>,
        now: Instant,
    ) -> Result<(), RateLimitRejection> {
        let ip_key = client_ip.to_string();
        let mut buckets = Vec::with_capacity(self.limiters.len());
        for limiter in self.limiters.iter().filter(|l| l.policy.enabled) {
            let key = match limiter.policy.scope {
                RateLimitScope::Global => GLOBAL_KEY,
                RateLimitScope::PerIp => ip_key.as_str(),
                RateLimitScope::PerUser => match user {
                    Some(user) => user,
                    None => return Err(limiter.reject(None)),
                },
            };
            buckets.push((limiter, limiter.bucket(key, now)));
        }

        // Locks are taken in policy order, one bucket per scope.
        let mut guards: Vec<(&RateLimiter, MutexGuard<'_, TokenBucket>)> = buckets
            .iter()
            .map(|(limiter, bucket)| (*limiter, bucket.lock().unwrap_or_else(PoisonError::into_inner)))
            .collect();

        for (limiter, bucket) in guards.iter_mut() {
            let decision = bucket.check(limiter.policy.capacity(), limiter.policy.refill_rate(), now);
            if let RateLimitDecision::Limited { retry_after } = decision {
                return Err(limiter.reject(Some(retry_after)));
            }
        }
        for (_, bucket) in guards.iter_mut() {
            bucket.take();
        }
        Ok(())
    }

    pub fn evict_idle(&self, now: Instant) -> usize {
        self.limiters
            .iter()
            .map(|l| l.evict_idle(now, self.idle_ttl))
            .sum()
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.iter().all(|l| !l.policy.enabled)
    }
}

/// Periodically evict idle buckets from whichever limiter set is current.
pub async fn run_sweeper(limiters: Arc<ArcSwap<RateLimiters>>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let interval = limiters.load().sweep_interval().max(Duration::from_secs(1));
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let evicted = limiters.load().evict_idle(Instant::now());
                if evicted > 0 {
                    tracing::debug!(evicted, "Evicted idle rate limit buckets");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(scope: RateLimitScope, requests: u32, window_secs: u64, burst: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            name: format!("{}-policy", scope),
            requests,
            window_secs,
            burst,
            scope,
            enabled: true,
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_token_bucket_conservation() {
        let limiter = RateLimiter::new(policy(RateLimitScope::PerIp, 1, 1, 10));
        let t0 = Instant::now();

        for _ in 0..10 {
            assert!(limiter.allow_at("k", t0).is_allowed());
        }
        match limiter.allow_at("k", t0) {
            RateLimitDecision::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected limited, got {:?}", other),
        }

        let t1 = t0 + Duration::from_secs(1);
        assert!(limiter.allow_at("k", t1).is_allowed());
        assert!(!limiter.allow_at("k", t1).is_allowed());
    }

    #[test]
    fn test_refill_is_capped() {
        let limiter = RateLimiter::new(policy(RateLimitScope::PerIp, 1, 1, 3));
        let t0 = Instant::now();
        assert!(limiter.allow_at("k", t0).is_allowed());

        let later = t0 + Duration::from_secs(3600);
        for _ in 0..3 {
            assert!(limiter.allow_at("k", later).is_allowed());
        }
        assert!(!limiter.allow_at("k", later).is_allowed());
    }

    #[test]
    fn test_fractional_refill() {
        // 2 requests per 4 seconds: one token every 2s
        let limiter = RateLimiter::new(policy(RateLimitScope::Global, 2, 4, 2));
        let t0 = Instant::now();
        assert!(limiter.allow_at("k", t0).is_allowed());
        assert!(limiter.allow_at("k", t0).is_allowed());

        let t1 = t0 + Duration::from_secs(1);
        match limiter.allow_at("k", t1) {
            RateLimitDecision::Limited { retry_after } => {
                assert!((retry_after.as_secs_f64() - 1.0).abs() < 1e-6);
            }
            other => panic!("expected limited, got {:?}", other),
        }
        assert!(limiter.allow_at("k", t0 + Duration::from_secs(2)).is_allowed());
    }

    #[test]
    fn test_keys_are_isolated() {
        let limiters = RateLimiters::from_config(&RateLimitConfig {
            policies: vec![policy(RateLimitScope::PerIp, 2, 60, 2)],
            ..Default::default()
        });
        let t0 = Instant::now();

        assert!(limiters.check_at(ip(1), None, t0).is_ok());
        assert!(limiters.check_at(ip(1), None, t0).is_ok());
        let rejection = limiters.check_at(ip(1), None, t0).unwrap_err();
        assert_eq!(rejection.scope, RateLimitScope::PerIp);
        assert!(rejection.retry_after.is_some());

        assert!(limiters.check_at(ip(2), None, t0).is_ok());
        assert!(limiters.check_at(ip(2), None, t0).is_ok());
    }

    #[test]
    fn test_disabled_policy_skips_buckets() {
        let mut disabled = policy(RateLimitScope::PerIp, 1, 60, 1);
        disabled.enabled = false;
        let limiter = RateLimiter::new(disabled);
        for _ in 0..100 {
            assert!(limiter.allow("k").is_allowed());
        }
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_per_user_fails_closed_without_identity() {
        let limiters = RateLimiters::from_config(&RateLimitConfig {
            policies: vec![policy(RateLimitScope::PerUser, 5, 60, 5)],
            ..Default::default()
        });

        let rejection = limiters.check(ip(1), None).unwrap_err();
        assert_eq!(rejection.scope, RateLimitScope::PerUser);
        assert_eq!(rejection.retry_after, None);
        assert_eq!(limiters.limiter(RateLimitScope::PerUser).unwrap().bucket_count(), 0);

        assert!(limiters.check(ip(1), Some("alice")).is_ok());
    }

    #[test]
    fn test_global_scope_shared_across_clients() {
        let limiters = RateLimiters::from_config(&RateLimitConfig {
            policies: vec![policy(RateLimitScope::Global, 1, 60, 1)],
            ..Default::default()
        });
        let t0 = Instant::now();
        assert!(limiters.check_at(ip(1), None, t0).is_ok());
        assert!(limiters.check_at(ip(2), Some("bob"), t0).is_err());
    }

    #[test]
    fn test_rejected_request_spends_no_tokens() {
        let limiters = RateLimiters::from_config(&RateLimitConfig {
            policies: vec![
                policy(RateLimitScope::Global, 10, 3600, 10),
                policy(RateLimitScope::PerIp, 1, 3600, 1),
            ],
            ..Default::default()
        });
        let t0 = Instant::now();

        assert!(limiters.check_at(ip(1), None, t0).is_ok());
        for _ in 0..9 {
            let rejection = limiters.check_at(ip(1), None, t0).unwrap_err();
            assert_eq!(rejection.scope, RateLimitScope::PerIp);
        }

        // Only the one admitted request came out of the shared bucket.
        for last in 2..11 {
            assert!(limiters.check_at(ip(last), None, t0).is_ok());
        }
        let rejection = limiters.check_at(ip(11), None, t0).unwrap_err();
        assert_eq!(rejection.scope, RateLimitScope::Global);
    }

    #[test]
    fn test_evict_idle() {
        let limiter = RateLimiter::new(policy(RateLimitScope::PerIp, 1, 1, 10));
        let t0 = Instant::now();
        limiter.allow_at("a", t0);
        limiter.allow_at("b", t0 + Duration::from_secs(30));

        // ttl is raised to the 10s full-refill time
        assert_eq!(limiter.evict_idle(t0 + Duration::from_secs(5), Duration::from_secs(1)), 0);
        assert_eq!(limiter.evict_idle(t0 + Duration::from_secs(35), Duration::from_secs(1)), 1);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_empty_set_allows() {
        let limiters = RateLimiters::default();
        assert!(limiters.is_empty());
        assert!(limiters.check(ip(1), None).is_ok());
    }
}
