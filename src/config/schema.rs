//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway,
//! including the policy model (services, routes, rate-limit policies and
//! circuit-breaker settings). All types derive Serde traits for
//! deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend service definitions.
    pub services: Vec<ServiceConfig>,

    /// Route definitions mapping requests to services.
    pub routes: Vec<RouteConfig>,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Default circuit breaker settings (services may override).
    pub circuit_breaker: CircuitBreakerSettings,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Request pipeline settings.
    pub gateway: PipelineConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Introspection endpoint settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A backend service as written in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Unique service name.
    pub name: String,

    /// Base URL (e.g., "http://orders:8080").
    pub url: String,

    /// Per-call timeout in milliseconds, used for probes and forwarding.
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,

    /// Path probed by the health checker.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Extra headers sent with every probe and forwarded request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-service breaker override.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerSettings>,
}

pub(crate) fn default_health_path() -> String {
    "/health".to_string()
}

fn default_service_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

/// Route configuration mapping requests to a service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path pattern: a literal prefix, optionally ending in `/*`.
    pub path: String,

    /// HTTP method or `*` for any.
    #[serde(default = "default_method")]
    pub method: String,

    /// Target service name.
    pub service: String,

    /// Remove the matched prefix before forwarding.
    #[serde(default)]
    pub strip_prefix: bool,

    /// Require an authenticated identity.
    #[serde(default)]
    pub require_auth: bool,

    /// Headers injected into forwarded requests.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "*".to_string()
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Circuit breaker settings, shared by every breaker unless a service
/// overrides them.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Minimum samples before the failure rate is evaluated, and number of
    /// probes admitted while half-open.
    pub max_requests: u32,

    /// Rolling window for closed-state counts in seconds (0 = never roll).
    pub interval_secs: u64,

    /// Time the circuit stays open before a probe is allowed, in seconds.
    pub timeout_secs: u64,

    /// Failure ratio in [0, 1] that opens the circuit.
    pub failure_threshold: f64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_requests: 3,
            interval_secs: 60,
            timeout_secs: 30,
            failure_threshold: 0.6,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Dimension along which rate-limit buckets are partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    Global,
    PerIp,
    PerUser,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Global => "global",
            RateLimitScope::PerIp => "per_ip",
            RateLimitScope::PerUser => "per_user",
        }
    }
}

impl std::fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token-bucket admission policy for one scope.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RateLimitPolicy {
    pub name: String,

    /// Requests allowed per window.
    pub requests: u32,

    /// Window length in seconds.
    pub window_secs: u64,

    /// Bucket capacity.
    pub burst: u32,

    pub scope: RateLimitScope,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RateLimitPolicy {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Sustained refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests) / self.window_secs as f64
    }

    pub fn capacity(&self) -> f64 {
        f64::from(self.burst)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// At most one policy per scope.
    pub policies: Vec<RateLimitPolicy>,

    /// Idle time after which a bucket may be evicted, in seconds.
    pub idle_ttl_secs: u64,

    /// How often idle buckets are swept, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            idle_ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

/// Request pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Header carrying the authenticated user id, set by the auth layer.
    pub identity_header: String,

    /// Use the first `X-Forwarded-For` entry as the client IP.
    pub trust_forwarded_for: bool,

    /// Paths that bypass rate limiting and circuit breaking. An entry ending
    /// in `/` matches as a prefix, any other entry matches exactly.
    pub exempt_paths: Vec<String>,

    /// Overall request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum buffered request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            identity_header: "x-user-id".to_string(),
            trust_forwarded_for: false,
            exempt_paths: vec!["/health".to_string(), "/gateway/".to_string()],
            request_timeout_secs: 60,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Introspection endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token required for `/gateway/*`; open when unset.
    pub api_key: Option<String>,
}
