//! Route matching logic.
//!
//! # Responsibilities
//! - Match HTTP method (exact or `*`)
//! - Match path prefix (case-sensitive, literal)
//! - Rewrite paths for strip-prefix routes
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - A trailing `/*` keeps its `/` for matching, so `/api/auth/*` never
//!   matches `/api/authorize`; the bare base `/api/auth` still matches
//! - No regex to guarantee O(n) matching

use axum::http::Method;

/// Matches the request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodMatcher {
    Any,
    Exact(Method),
}

impl MethodMatcher {
    /// Parse `*` or an HTTP method name (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == "*" {
            return Some(MethodMatcher::Any);
        }
        Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
            .ok()
            .map(MethodMatcher::Exact)
    }

    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodMatcher::Any => true,
            MethodMatcher::Exact(expected) => expected == method,
        }
    }
}

impl std::fmt::Display for MethodMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodMatcher::Any => f.write_str("*"),
            MethodMatcher::Exact(method) => f.write_str(method.as_str()),
        }
    }
}

/// Matches the request path against a stored pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pattern: String,
    /// Pattern with the trailing `*` removed (`/api/auth/`).
    match_prefix: String,
    /// Pattern with the trailing `/*` removed (`/api/auth`).
    base: String,
}

impl PathPattern {
    /// Create a new path pattern. Returns `None` unless it starts with `/`.
    pub fn new(pattern: impl Into<String>) -> Option<Self> {
        let pattern = pattern.into();
        if !pattern.starts_with('/') {
            return None;
        }

        let (match_prefix, base) = match pattern.strip_suffix("/*") {
            Some(base) => (format!("{}/", base), base.to_string()),
            None => (pattern.clone(), pattern.clone()),
        };

        Some(Self {
            pattern,
            match_prefix,
            base,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn is_wildcard(&self) -> bool {
        self.pattern.ends_with("/*")
    }

    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.match_prefix) || (self.is_wildcard() && path == self.base)
    }

    /// Remove the literal base from `path`. The result always starts with
    /// `/`; a path that does not carry the base is returned unchanged.
    pub fn strip(&self, path: &str) -> String {
        match path.strip_prefix(self.base.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            Some(rest) => format!("/{}", rest),
            None => path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_matcher() {
        let any = MethodMatcher::parse("*").unwrap();
        assert!(any.matches(&Method::GET));
        assert!(any.matches(&Method::DELETE));

        let get = MethodMatcher::parse("get").unwrap();
        assert_eq!(get, MethodMatcher::Exact(Method::GET));
        assert!(get.matches(&Method::GET));
        assert!(!get.matches(&Method::POST));

        assert!(MethodMatcher::parse("NOT A METHOD").is_none());
        assert_eq!(get.to_string(), "GET");
        assert_eq!(any.to_string(), "*");
    }

    #[test]
    fn test_wildcard_prefix() {
        let pattern = PathPattern::new("/api/auth/*").unwrap();
        assert!(pattern.matches("/api/auth/verify"));
        assert!(pattern.matches("/api/auth/"));
        assert!(pattern.matches("/api/auth"));
        assert!(!pattern.matches("/api/authorize"));
        assert!(!pattern.matches("/api"));
    }

    #[test]
    fn test_literal_prefix() {
        let pattern = PathPattern::new("/health").unwrap();
        assert!(pattern.matches("/health"));
        assert!(pattern.matches("/healthz"));
        assert!(!pattern.matches("/api/health"));
    }

    #[test]
    fn test_strip() {
        let pattern = PathPattern::new("/api/orders/*").unwrap();
        assert_eq!(pattern.strip("/api/orders/42"), "/42");
        assert_eq!(pattern.strip("/api/orders/"), "/");
        assert_eq!(pattern.strip("/api/orders"), "/");
        assert_eq!(pattern.strip("/other"), "/other");

        let literal = PathPattern::new("/v1").unwrap();
        assert_eq!(literal.strip("/v1items"), "/items");
    }

    #[test]
    fn test_rejects_relative_pattern() {
        assert!(PathPattern::new("api/*").is_none());
    }
}
