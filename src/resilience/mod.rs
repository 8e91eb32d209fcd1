//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to service:
//!     → circuit_breaker.rs (admit or fail fast)
//!     → forward with the service timeout (gateway::forward)
//!     → circuit_breaker.rs (record success / failure via the permit)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - Circuit-open rejections never count as failures
//! - Breakers are independent per service

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerSnapshot, CallPermit, CircuitBreaker, CircuitBreakers, CircuitState,
};
