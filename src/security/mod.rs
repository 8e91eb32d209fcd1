//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Routed request:
//!     → rate_limit.rs (global / per-IP / per-user token buckets)
//!     → Pass to circuit breaker
//! ```
//!
//! # Design Decisions
//! - Fail closed: per-user limits reject requests with no identity
//! - Rate limiting is a caller-side decision, never a backend health signal
//! - Buckets are evicted once idle long enough to be full again

pub mod rate_limit;

pub use rate_limit::{RateLimitDecision, RateLimitRejection, RateLimiter, RateLimiters};
