//! Rejections and backend failures mapped to client responses.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::forward::ForwardError;
use crate::security::rate_limit::RateLimitRejection;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no route for {method} {path}")]
    NotFound { method: Method, path: String },

    #[error("authentication required")]
    Unauthorized,

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("rate limit '{}' exceeded", .0.policy)]
    RateLimited(RateLimitRejection),

    #[error("service '{service}' is unavailable (circuit open)")]
    CircuitOpen {
        service: String,
        retry_after: Option<Duration>,
    },

    #[error(transparent)]
    Backend(#[from] ForwardError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Backend(ForwardError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Backend(ForwardError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            GatewayError::Backend(ForwardError::InvalidRequest(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Hint for the `Retry-After` header, rounded up to whole seconds.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited(rejection) => rejection.retry_after,
            GatewayError::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        let mut response = (status, body).into_response();
        if let Some(wait) = self.retry_after() {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(wait)),
            );
        }
        response
    }
}
