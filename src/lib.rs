//! API gateway resilience core.
//!
//! Service registry with active health checking, first-match routing with
//! prefix stripping, token-bucket rate limiting, and per-service circuit
//! breakers, composed into a reverse-proxy request pipeline.

pub mod admin;
pub mod config;
pub mod gateway;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::GatewayConfig;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::ServiceRegistry;
