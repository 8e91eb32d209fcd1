//! Service endpoint model.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use url::Url;

use crate::config::schema::{default_health_path, CircuitBreakerSettings, ServiceConfig};
use crate::config::validation::{validate_breaker_settings, validate_service, ValidationError};
use crate::health::state::HealthStatus;

/// A registered backend service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceEndpoint {
    pub name: String,
    pub url: Url,
    /// Per-call timeout for probes and forwarded requests.
    pub timeout: Duration,
    pub health_path: String,
    pub headers: BTreeMap<String, String>,
    pub enabled: bool,
    pub status: HealthStatus,
    pub last_checked: Option<SystemTime>,
    pub latency: Option<Duration>,
    /// Breaker override; the gateway default applies when `None`.
    pub circuit_breaker: Option<CircuitBreakerSettings>,
}

impl ServiceEndpoint {
    /// Create an enabled endpoint with default health path and no headers.
    pub fn new(name: impl Into<String>, url: &str, timeout: Duration) -> Result<Self, ValidationError> {
        let name = name.into();
        let url = Url::parse(url).map_err(|e| ValidationError::InvalidService {
            name: name.clone(),
            reason: format!("invalid url: {}", e),
        })?;

        Ok(Self {
            name,
            url,
            timeout,
            health_path: default_health_path(),
            headers: BTreeMap::new(),
            enabled: true,
            status: HealthStatus::Unknown,
            last_checked: None,
            latency: None,
            circuit_breaker: None,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, ValidationError> {
        let url = validate_service(config)?;
        Ok(Self {
            name: config.name.clone(),
            url,
            timeout: Duration::from_millis(config.timeout_ms),
            health_path: config.health_path.clone(),
            headers: config.headers.clone(),
            enabled: config.enabled,
            status: HealthStatus::Unknown,
            last_checked: None,
            latency: None,
            circuit_breaker: config.circuit_breaker,
        })
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Registration-time checks on fields callers may have set directly.
    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidService {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.url.scheme() != "http" && self.url.scheme() != "https" {
            return Err(invalid("url scheme must be http or https"));
        }
        if self.url.host_str().is_none() {
            return Err(invalid("url has no host"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be greater than 0"));
        }
        if let Some(settings) = &self.circuit_breaker {
            validate_breaker_settings(&self.name, settings)?;
        }
        Ok(())
    }

    /// Apply registration defaults: health path and unknown status.
    pub(crate) fn normalize(&mut self) {
        let path = self.health_path.trim();
        self.health_path = if path.is_empty() {
            default_health_path()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        self.status = HealthStatus::Unknown;
        self.last_checked = None;
        self.latency = None;
    }

    /// Join the base URL with an absolute path (and optional query).
    pub fn target_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.url.as_str().trim_end_matches('/'), path_and_query)
    }

    pub fn health_url(&self) -> String {
        self.target_url(&self.health_path)
    }

    pub fn is_healthy(&self) -> bool {
        self.enabled && self.status.is_healthy()
    }

    /// Serializable view for introspection.
    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            url: self.url.to_string(),
            status: self.status,
            enabled: self.enabled,
            last_checked: self
                .last_checked
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
            latency_ms: self.latency.map(|d| d.as_millis() as u64),
        }
    }
}

/// Introspection view of a service.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    pub url: String,
    pub status: HealthStatus,
    pub enabled: bool,
    /// Unix epoch milliseconds of the last probe.
    pub last_checked: Option<u64>,
    pub latency_ms: Option<u64>,
}
