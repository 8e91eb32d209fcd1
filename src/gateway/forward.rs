//! Forwarding to upstream services.
//!
//! The pipeline only needs a success/failure classification from the
//! forwarder; response bodies are streamed back untouched.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Response};
use tokio::time;

use crate::http::client::{upstream_client, UpstreamClient};

/// A fully resolved upstream call.
#[derive(Debug)]
pub struct ForwardRequest {
    pub service: String,
    /// Absolute target URL including the rewritten path and query.
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Body,
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The call could not be built; the service was never contacted.
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
}

impl ForwardError {
    /// Whether this error reflects on the service's health.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(self, ForwardError::InvalidRequest(_))
    }
}

/// Boxed future returned by [`Forwarder::forward`].
pub type ForwardFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response<Body>, ForwardError>> + Send + 'a>>;

/// The reverse-proxy collaborator.
pub trait Forwarder: Send + Sync {
    fn forward(&self, request: ForwardRequest) -> ForwardFuture<'_>;
}

/// Forwarder backed by a pooled hyper client (`http` and `https` upstreams).
#[derive(Clone)]
pub struct HyperForwarder {
    client: UpstreamClient,
}

impl Default for HyperForwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperForwarder {
    pub fn new() -> Self {
        Self {
            client: upstream_client(),
        }
    }
}

impl Forwarder for HyperForwarder {
    fn forward(&self, request: ForwardRequest) -> ForwardFuture<'_> {
        Box::pin(async move {
            let mut builder = Request::builder()
                .method(request.method)
                .uri(request.url.as_str());
            if let Some(headers) = builder.headers_mut() {
                *headers = request.headers;
            }
            let upstream = builder
                .body(request.body)
                .map_err(|e| ForwardError::InvalidRequest(e.to_string()))?;

            match time::timeout(request.timeout, self.client.request(upstream)).await {
                Ok(Ok(response)) => {
                    let (parts, body) = response.into_parts();
                    Ok(Response::from_parts(parts, Body::new(body)))
                }
                Ok(Err(e)) => {
                    tracing::error!(service = %request.service, url = %request.url, error = %e, "Upstream error");
                    Err(ForwardError::Upstream(e.to_string()))
                }
                Err(_) => {
                    tracing::warn!(service = %request.service, url = %request.url, timeout = ?request.timeout, "Upstream timeout");
                    Err(ForwardError::Timeout(request.timeout))
                }
            }
        })
    }
}
