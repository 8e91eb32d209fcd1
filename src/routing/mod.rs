//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → registry::ServiceRegistry::find_route (ordered scan)
//!     → rule.rs (evaluate method + path conditions)
//!     → matcher.rs (method / prefix matching, strip-prefix rewrite)
//!     → Return: matched RouteRule + ServiceEndpoint, or not found
//!
//! Route Compilation (at startup / reload):
//!     RouteConfig[]
//!     → RouteRule::from_config
//!     → Registered in declaration order
//! ```
//!
//! # Design Decisions
//! - Routes compiled once, read-only while serving
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First registered match wins; there is no priority field

pub mod matcher;
pub mod rule;

pub use matcher::{MethodMatcher, PathPattern};
pub use rule::{RouteInfo, RouteRule};
