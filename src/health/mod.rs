//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer (first round immediately)
//!     → Snapshot enabled services from the registry
//!     → Probe all of them concurrently, each with its own timeout
//!     → Write status + latency back (state.rs)
//! ```
//!
//! # Design Decisions
//! - Status is per service and reflects the latest probe
//! - Probe failures are logged, never surfaced to in-flight requests
//! - The loop is owned by the registry and joined on stop

pub mod active;
pub mod state;

pub use active::HealthChecker;
pub use state::HealthStatus;
