//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: introspection, liveness, catch-all proxy
//! - Wire up middleware (request ID, tracing, body limit, timeout)
//! - Run background tasks (health checking, bucket sweeper, config reload)
//! - Dispatch proxied requests through the gateway pipeline

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::config::schema::{AdminConfig, GatewayConfig, HealthCheckConfig};
use crate::config::validation::ValidationError;
use crate::gateway::{ClientContext, Forwarder, Gateway, HyperForwarder};
use crate::http::request::{
    make_request_span, propagate_request_id_layer, request_id, set_request_id_layer,
};
use crate::lifecycle::startup::build_gateway;
use crate::observability::metrics;
use crate::security::rate_limit::run_sweeper;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub admin: Arc<ArcSwap<AdminConfig>>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    config: GatewayConfig,
}

impl HttpServer {
    /// Create a server that forwards over plain HTTP.
    pub fn new(config: GatewayConfig) -> Result<Self, Vec<ValidationError>> {
        Self::with_forwarder(config, Arc::new(HyperForwarder::new()))
    }

    pub fn with_forwarder(
        config: GatewayConfig,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Self, Vec<ValidationError>> {
        let gateway = Arc::new(build_gateway(&config, forwarder)?);
        let state = AppState {
            gateway,
            admin: Arc::new(ArcSwap::from_pointee(config.admin.clone())),
        };

        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            state,
            config,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .merge(admin::setup_admin_router(state.clone()))
            .route("/health", get(admin::handlers::get_health))
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
                    .layer(propagate_request_id_layer())
                    .layer(RequestBodyLimitLayer::new(config.gateway.max_body_bytes))
                    .layer(TimeoutLayer::new(Duration::from_secs(
                        config.gateway.request_timeout_secs,
                    ))),
            )
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires, applying configurations
    /// received on `config_updates` as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let registry = Arc::clone(self.state.gateway.registry());
        if self.config.health_check.enabled {
            registry.start_health_checking(self.config.health_check.interval());
        }

        let sweeper = tokio::spawn(run_sweeper(
            self.state.gateway.limiters(),
            shutdown.resubscribe(),
        ));
        let reloader = tokio::spawn(reload_loop(
            self.state.clone(),
            self.config.health_check.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        reloader.abort();
        registry.stop_health_checking().await;
        let _ = sweeper.await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Apply configuration updates until shutdown.
async fn reload_loop(
    state: AppState,
    mut health: HealthCheckConfig,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(config) = updates.recv() => {
                match state.gateway.reload(&config) {
                    Ok(()) => {
                        state.admin.store(Arc::new(config.admin.clone()));
                        if config.health_check.enabled != health.enabled
                            || config.health_check.interval_secs != health.interval_secs
                        {
                            restart_health_checking(&state, &config.health_check).await;
                            health = config.health_check;
                        }
                    }
                    Err(errors) => {
                        for error in &errors {
                            tracing::error!(error = %error, "Rejected configuration reload");
                        }
                    }
                }
            }
            _ = shutdown.recv() => break,
            else => break,
        }
    }
}

async fn restart_health_checking(state: &AppState, health: &HealthCheckConfig) {
    let registry = state.gateway.registry();
    registry.stop_health_checking().await;
    if health.enabled {
        registry.start_health_checking(health.interval());
    }
    tracing::info!(
        enabled = health.enabled,
        interval_secs = health.interval_secs,
        "Health checking reconfigured"
    );
}

/// Catch-all proxy handler.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let request_id = request_id(&request).unwrap_or_else(|| "unknown".to_string());
    let client = ClientContext::from_request(request.headers(), peer, &state.gateway.settings());

    let resolved = match state
        .gateway
        .resolve(request.method(), request.uri().path())
    {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "No route matched");
            let response = e.into_response();
            metrics::record_request(&method, response.status().as_u16(), "none", start);
            return response;
        }
    };

    let service = resolved.service.name.clone();
    let response = match state.gateway.dispatch(resolved, request, &client).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                service = %service,
                client_ip = %client.ip,
                error = %e,
                "Request rejected"
            );
            e.into_response()
        }
    };

    metrics::record_request(&method, response.status().as_u16(), &service, start);
    response
}
