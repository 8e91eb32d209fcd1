//! Read-only introspection endpoints under `/gateway/`.

pub mod auth;
pub mod handlers;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/gateway/services", get(get_services))
        .route("/gateway/routes", get(get_routes))
        .route("/gateway/stats", get(get_stats))
        .route("/gateway/breakers", get(get_breakers))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
