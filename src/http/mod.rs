//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, request span)
//!     → /gateway/* and /health: admin handlers
//!     → everything else: gateway pipeline
//!     → Send to client
//! ```

pub mod client;
pub mod request;
pub mod server;

pub use client::{upstream_client, UpstreamClient};
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
