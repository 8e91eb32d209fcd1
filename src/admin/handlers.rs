use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::registry::{RegistryStats, ServiceInfo};
use crate::resilience::BreakerSnapshot;
use crate::routing::RouteInfo;

#[derive(Serialize)]
pub struct GatewayHealth {
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct GatewayStats {
    #[serde(flatten)]
    pub registry: RegistryStats,
    pub health_checking: bool,
    pub open_circuits: usize,
}

pub async fn get_health() -> Json<GatewayHealth> {
    Json(GatewayHealth {
        version: env!("CARGO_PKG_VERSION"),
        status: "ok",
    })
}

pub async fn get_services(State(state): State<AppState>) -> Json<Vec<ServiceInfo>> {
    let services = state.gateway.registry().list_services();
    Json(services.iter().map(|s| s.info()).collect())
}

pub async fn get_routes(State(state): State<AppState>) -> Json<Vec<RouteInfo>> {
    Json(state.gateway.registry().route_infos())
}

pub async fn get_stats(State(state): State<AppState>) -> Json<GatewayStats> {
    let registry = state.gateway.registry();
    let open_circuits = state
        .gateway
        .breakers()
        .snapshot()
        .iter()
        .filter(|b| b.state != crate::resilience::CircuitState::Closed)
        .count();

    Json(GatewayStats {
        registry: registry.stats(),
        health_checking: registry.is_health_checking(),
        open_circuits,
    })
}

pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.gateway.breakers().snapshot())
}
