//! Caller identity used for rate-limit scoping.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

use crate::config::schema::PipelineConfig;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Who is calling: resolved client IP and, when the upstream auth layer
/// vouched for one, the user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip: IpAddr,
    pub user: Option<String>,
}

impl ClientContext {
    pub fn new(ip: IpAddr) -> Self {
        Self { ip, user: None }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Build from request headers and the peer address. The identity header
    /// is trusted as-is; stripping client-supplied copies is the auth
    /// layer's job.
    pub fn from_request(headers: &HeaderMap, peer: SocketAddr, config: &PipelineConfig) -> Self {
        let forwarded = config
            .trust_forwarded_for
            .then(|| {
                headers
                    .get(X_FORWARDED_FOR)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.split(',').next())
                    .and_then(|v| v.trim().parse::<IpAddr>().ok())
            })
            .flatten();

        let user = headers
            .get(config.identity_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from);

        Self {
            ip: forwarded.unwrap_or_else(|| peer.ip()),
            user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.168.1.5:40000".parse().unwrap()
    }

    #[test]
    fn test_peer_ip_and_identity() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static(" alice "));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));

        let ctx = ClientContext::from_request(&headers, peer(), &PipelineConfig::default());
        assert_eq!(ctx.ip, peer().ip());
        assert_eq!(ctx.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_trusted_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1, 172.16.0.1"));
        let config = PipelineConfig {
            trust_forwarded_for: true,
            ..Default::default()
        };

        let ctx = ClientContext::from_request(&headers, peer(), &config);
        assert_eq!(ctx.ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(ctx.user, None);

        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("garbage"));
        let ctx = ClientContext::from_request(&headers, peer(), &config);
        assert_eq!(ctx.ip, peer().ip());
    }

    #[test]
    fn test_empty_identity_is_anonymous() {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static(""));
        let ctx = ClientContext::from_request(&headers, peer(), &PipelineConfig::default());
        assert_eq!(ctx.user, None);
    }
}
