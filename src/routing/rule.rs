//! Compiled route rules.

use std::collections::BTreeMap;

use axum::http::Method;
use serde::Serialize;

use crate::config::schema::RouteConfig;
use crate::config::validation::ValidationError;
use crate::routing::matcher::{MethodMatcher, PathPattern};

/// A mapping from inbound request shape to a target service.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRule {
    pub path: PathPattern,
    pub method: MethodMatcher,
    pub service: String,
    pub strip_prefix: bool,
    pub require_auth: bool,
    pub headers: BTreeMap<String, String>,
}

impl RouteRule {
    /// Compile a route from configuration.
    pub fn from_config(config: &RouteConfig) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidRoute {
            path: config.path.clone(),
            reason,
        };

        let path = PathPattern::new(config.path.as_str())
            .ok_or_else(|| invalid("path must start with '/'".into()))?;
        let method = MethodMatcher::parse(&config.method)
            .ok_or_else(|| invalid(format!("invalid method '{}'", config.method)))?;
        if config.service.trim().is_empty() {
            return Err(invalid("service must not be empty".into()));
        }

        Ok(Self {
            path,
            method,
            service: config.service.clone(),
            strip_prefix: config.strip_prefix,
            require_auth: config.require_auth,
            headers: config.headers.clone(),
        })
    }

    /// Returns true if both method and path match.
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.matches(method) && self.path.matches(path)
    }

    /// Path to forward upstream for a request path matched by this rule.
    pub fn forward_path(&self, path: &str) -> String {
        if self.strip_prefix {
            self.path.strip(path)
        } else {
            path.to_string()
        }
    }

    /// Serializable view for introspection.
    pub fn info(&self) -> RouteInfo {
        RouteInfo {
            path: self.path.as_str().to_string(),
            method: self.method.to_string(),
            service: self.service.clone(),
            require_auth: self.require_auth,
            strip_prefix: self.strip_prefix,
        }
    }
}

/// Introspection view of a route.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RouteInfo {
    pub path: String,
    pub method: String,
    pub service: String,
    pub require_auth: bool,
    pub strip_prefix: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: &str, method: &str, strip_prefix: bool) -> RouteConfig {
        RouteConfig {
            path: path.into(),
            method: method.into(),
            service: "orders".into(),
            strip_prefix,
            require_auth: false,
            headers: Default::default(),
        }
    }

    #[test]
    fn test_compile_and_match() {
        let rule = RouteRule::from_config(&config("/api/orders/*", "GET", true)).unwrap();
        assert!(rule.matches(&Method::GET, "/api/orders/42"));
        assert!(!rule.matches(&Method::POST, "/api/orders/42"));
        assert!(!rule.matches(&Method::GET, "/api/ordersx"));
        assert_eq!(rule.forward_path("/api/orders/42"), "/42");
    }

    #[test]
    fn test_forward_path_without_strip() {
        let rule = RouteRule::from_config(&config("/api/orders/*", "*", false)).unwrap();
        assert_eq!(rule.forward_path("/api/orders/42"), "/api/orders/42");
    }

    #[test]
    fn test_invalid_route() {
        assert!(matches!(
            RouteRule::from_config(&config("orders", "*", false)),
            Err(ValidationError::InvalidRoute { .. })
        ));
        assert!(matches!(
            RouteRule::from_config(&config("/orders", "G ET", false)),
            Err(ValidationError::InvalidRoute { .. })
        ));
    }

    #[test]
    fn test_info() {
        let info = RouteRule::from_config(&config("/api/orders/*", "post", true))
            .unwrap()
            .info();
        assert_eq!(info.method, "POST");
        assert_eq!(info.path, "/api/orders/*");
        assert!(info.strip_prefix);
    }
}
