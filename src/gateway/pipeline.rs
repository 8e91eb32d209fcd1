//! Request pipeline: resolve, authorize, limit, admit, forward, record.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Response};

use super::forward::{ForwardRequest, Forwarder};
use super::identity::ClientContext;
use super::outcome::GatewayError;
use crate::config::schema::{GatewayConfig, PipelineConfig};
use crate::config::validation::{validate_config, ValidationError};
use crate::observability::metrics;
use crate::registry::{ServiceEndpoint, ServiceRegistry};
use crate::resilience::circuit_breaker::{self, CallPermit, CircuitBreakers};
use crate::routing::RouteRule;
use crate::security::rate_limit::RateLimiters;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers that describe the client connection, not the request.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A matched route together with the service it targets.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub rule: RouteRule,
    pub service: ServiceEndpoint,
    /// Upstream path after prefix stripping (query excluded).
    pub forward_path: String,
}

/// The gateway request pipeline and the shared state it consults.
pub struct Gateway {
    registry: Arc<ServiceRegistry>,
    breakers: CircuitBreakers,
    limiters: Arc<ArcSwap<RateLimiters>>,
    settings: ArcSwap<PipelineConfig>,
    forwarder: Arc<dyn Forwarder>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .field("breakers", &self.breakers)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Wire a pipeline around an already populated registry.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        config: &GatewayConfig,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        let breakers = CircuitBreakers::new(config.circuit_breaker);
        breakers.sync(config.circuit_breaker, &registry.list_services());

        Self {
            registry,
            breakers,
            limiters: Arc::new(ArcSwap::from_pointee(RateLimiters::from_config(
                &config.rate_limit,
            ))),
            settings: ArcSwap::from_pointee(config.gateway.clone()),
            forwarder,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    /// Shared handle to the current limiter set (for the idle sweeper).
    pub fn limiters(&self) -> Arc<ArcSwap<RateLimiters>> {
        Arc::clone(&self.limiters)
    }

    pub fn settings(&self) -> Arc<PipelineConfig> {
        self.settings.load_full()
    }

    /// Find the route and service for a request.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<ResolvedRoute, GatewayError> {
        let (rule, service) = self.registry.find_route(method, path).ok_or_else(|| {
            GatewayError::NotFound {
                method: method.clone(),
                path: path.to_string(),
            }
        })?;

        let forward_path = rule.forward_path(path);
        Ok(ResolvedRoute {
            rule,
            service,
            forward_path,
        })
    }

    /// Whether `path` bypasses rate limiting and circuit breaking.
    pub fn is_exempt(&self, path: &str) -> bool {
        is_exempt(&self.settings.load().exempt_paths, path)
    }

    /// Run the rate limiters and take a breaker permit.
    fn admit(
        &self,
        resolved: &ResolvedRoute,
        client: &ClientContext,
    ) -> Result<CallPermit, GatewayError> {
        self.limiters
            .load()
            .check(client.ip, client.user.as_deref())
            .map_err(|rejection| {
                tracing::warn!(
                    client_ip = %client.ip,
                    policy = %rejection.policy,
                    scope = %rejection.scope,
                    "Rate limit exceeded"
                );
                GatewayError::RateLimited(rejection)
            })?;

        let breaker = self.breakers.get(&resolved.service);
        breaker.try_acquire().ok_or_else(|| {
            let service = resolved.service.name.clone();
            tracing::warn!(service = %service, "Circuit open, rejecting request");
            metrics::record_circuit_rejected(&service);
            GatewayError::CircuitOpen {
                service,
                retry_after: circuit_breaker::retry_after(&breaker, Instant::now()),
            }
        })
    }

    /// Handle one proxied request end to end.
    ///
    /// Only forwarded calls report to the breaker: rate-limit and circuit-open
    /// rejections never count as failures.
    pub async fn handle(
        &self,
        request: Request<Body>,
        client: &ClientContext,
    ) -> Result<Response<Body>, GatewayError> {
        let resolved = self.resolve(request.method(), request.uri().path())?;
        self.dispatch(resolved, request, client).await
    }

    /// Run the remaining pipeline steps for an already resolved request.
    pub async fn dispatch(
        &self,
        resolved: ResolvedRoute,
        request: Request<Body>,
        client: &ClientContext,
    ) -> Result<Response<Body>, GatewayError> {
        let settings = self.settings.load_full();
        let (parts, body) = request.into_parts();
        let path = parts.uri.path();

        if resolved.rule.require_auth && client.user.is_none() {
            tracing::debug!(path = %path, service = %resolved.service.name, "Missing identity");
            return Err(GatewayError::Unauthorized);
        }

        if content_length(&parts.headers).is_some_and(|len| len > settings.max_body_bytes) {
            return Err(GatewayError::PayloadTooLarge {
                limit: settings.max_body_bytes,
            });
        }

        let permit = if is_exempt(&settings.exempt_paths, path) {
            None
        } else {
            Some(self.admit(&resolved, client)?)
        };

        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{}?{}", resolved.forward_path, query),
            None => resolved.forward_path.clone(),
        };
        let forward = ForwardRequest {
            service: resolved.service.name.clone(),
            url: resolved.service.target_url(&path_and_query),
            method: parts.method.clone(),
            headers: upstream_headers(&parts.headers, &resolved, client),
            body,
            timeout: resolved.service.timeout,
        };

        tracing::debug!(
            method = %forward.method,
            path = %path,
            service = %forward.service,
            upstream = %forward.url,
            "Forwarding request"
        );

        match self.forwarder.forward(forward).await {
            Ok(response) => {
                if let Some(permit) = permit {
                    permit.record(!response.status().is_server_error());
                }
                Ok(response)
            }
            Err(e) => {
                if let Some(permit) = permit {
                    if e.is_backend_failure() {
                        permit.failure();
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Apply a new configuration: registry, breakers, limiters and pipeline
    /// settings. Nothing changes if the configuration is invalid.
    pub fn reload(&self, config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
        validate_config(config)?;
        self.registry.apply_config(config)?;

        self.breakers
            .sync(config.circuit_breaker, &self.registry.list_services());
        self.limiters
            .store(Arc::new(RateLimiters::from_config(&config.rate_limit)));
        self.settings.store(Arc::new(config.gateway.clone()));

        tracing::info!(
            services = config.services.len(),
            routes = config.routes.len(),
            policies = config.rate_limit.policies.len(),
            "Gateway configuration reloaded"
        );
        Ok(())
    }
}

fn is_exempt(exempt_paths: &[String], path: &str) -> bool {
    exempt_paths.iter().any(|exempt| {
        if exempt.ends_with('/') {
            path.starts_with(exempt.as_str()) || path == exempt.trim_end_matches('/')
        } else {
            path == exempt
        }
    })
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Inbound headers minus hop-by-hop and `Host`, plus configured service and
/// route headers (route wins) and the client in `X-Forwarded-For`.
fn upstream_headers(inbound: &HeaderMap, resolved: &ResolvedRoute, client: &ClientContext) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 1);
    for (name, value) in inbound {
        if name == header::HOST || HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let configured = resolved
        .service
        .headers
        .iter()
        .chain(resolved.rule.headers.iter());
    for (name, value) in configured {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid configured header"),
        }
    }

    let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client.ip),
        None => client.ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    headers
}
