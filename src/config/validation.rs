//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing services)
//! - Validate value ranges (timeouts > 0, burst >= requests > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system, never per request

use std::collections::HashSet;

use url::Url;

use crate::config::schema::{
    CircuitBreakerSettings, GatewayConfig, RateLimitPolicy, RateLimitScope, ServiceConfig,
};
use crate::routing::rule::RouteRule;

/// A configuration-class error. Fatal at startup, rejected on reload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("service '{name}' is defined more than once")]
    DuplicateService { name: String },

    #[error("service '{name}': {reason}")]
    InvalidService { name: String, reason: String },

    #[error("route '{path}': {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("route {index} ({path}) references unknown service '{service}'")]
    UnknownService {
        index: usize,
        path: String,
        service: String,
    },

    #[error("rate limit policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },

    #[error("more than one rate limit policy for scope '{scope}'")]
    DuplicateScope { scope: RateLimitScope },

    #[error("circuit breaker settings for '{owner}': {reason}")]
    InvalidCircuitBreaker { owner: String, reason: String },

    #[error("health check: {reason}")]
    InvalidHealthCheck { reason: String },

    #[error("gateway: {reason}")]
    InvalidGateway { reason: String },
}

/// Check a service definition and return its parsed base URL.
pub fn validate_service(service: &ServiceConfig) -> Result<Url, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidService {
        name: service.name.clone(),
        reason,
    };

    if service.name.trim().is_empty() {
        return Err(invalid("name must not be empty".into()));
    }
    if service.url.trim().is_empty() {
        return Err(invalid("url is required".into()));
    }
    let url = Url::parse(&service.url).map_err(|e| invalid(format!("invalid url: {}", e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported url scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("url has no host".into()));
    }
    if service.timeout_ms == 0 {
        return Err(invalid("timeout_ms must be greater than 0".into()));
    }
    if let Some(settings) = &service.circuit_breaker {
        validate_breaker_settings(&service.name, settings)?;
    }
    Ok(url)
}

pub fn validate_rate_limit_policy(policy: &RateLimitPolicy) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidPolicy {
        name: policy.name.clone(),
        reason: reason.to_string(),
    };

    if policy.requests == 0 {
        return Err(invalid("requests must be greater than 0"));
    }
    if policy.burst < policy.requests {
        return Err(invalid("burst must be greater than or equal to requests"));
    }
    if policy.window_secs == 0 {
        return Err(invalid("window_secs must be greater than 0"));
    }
    Ok(())
}

pub fn validate_breaker_settings(
    owner: &str,
    settings: &CircuitBreakerSettings,
) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidCircuitBreaker {
        owner: owner.to_string(),
        reason: reason.to_string(),
    };

    if settings.max_requests == 0 {
        return Err(invalid("max_requests must be greater than 0"));
    }
    if settings.timeout_secs == 0 {
        return Err(invalid("timeout_secs must be greater than 0"));
    }
    if !(0.0..=1.0).contains(&settings.failure_threshold) {
        return Err(invalid("failure_threshold must be within [0, 1]"));
    }
    Ok(())
}

/// Validate a whole configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    for service in &config.services {
        if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService {
                name: service.name.clone(),
            });
        }
        if let Err(e) = validate_service(service) {
            errors.push(e);
        }
    }

    for (index, route) in config.routes.iter().enumerate() {
        if let Err(e) = RouteRule::from_config(route) {
            errors.push(e);
        }
        if !names.contains(route.service.as_str()) {
            errors.push(ValidationError::UnknownService {
                index,
                path: route.path.clone(),
                service: route.service.clone(),
            });
        }
    }

    let mut scopes = HashSet::new();
    for policy in &config.rate_limit.policies {
        if !scopes.insert(policy.scope) {
            errors.push(ValidationError::DuplicateScope {
                scope: policy.scope,
            });
        }
        if let Err(e) = validate_rate_limit_policy(policy) {
            errors.push(e);
        }
    }

    if let Err(e) = validate_breaker_settings("default", &config.circuit_breaker) {
        errors.push(e);
    }

    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::InvalidHealthCheck {
            reason: "interval_secs must be greater than 0".into(),
        });
    }

    if config.gateway.request_timeout_secs == 0 {
        errors.push(ValidationError::InvalidGateway {
            reason: "request_timeout_secs must be greater than 0".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
