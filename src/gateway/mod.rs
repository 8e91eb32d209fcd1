//! Gateway request pipeline.
//!
//! # Data Flow
//! ```text
//! Incoming request
//!     → identity.rs (client IP, user id)
//!     → pipeline.rs (route → auth → rate limit → breaker permit)
//!     → forward.rs (upstream call with the service timeout)
//!     → pipeline.rs (outcome reported to the breaker)
//!     → outcome.rs (rejections as HTTP responses)
//! ```

pub mod forward;
pub mod identity;
pub mod outcome;
pub mod pipeline;

pub use forward::{ForwardError, ForwardRequest, Forwarder, HyperForwarder};
pub use identity::ClientContext;
pub use outcome::GatewayError;
pub use pipeline::{Gateway, ResolvedRoute};
