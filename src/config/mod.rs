//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → lifecycle::startup builds registry, limiters, breakers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps services/routes/policies atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All sections have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerSettings, GatewayConfig, HealthCheckConfig, ListenerConfig,
    LogFormat, ObservabilityConfig, PipelineConfig, RateLimitConfig, RateLimitPolicy,
    RateLimitScope, RouteConfig, ServiceConfig,
};
pub use validation::ValidationError;
