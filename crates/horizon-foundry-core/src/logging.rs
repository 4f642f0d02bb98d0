//! Logging facilities for Horizon Foundry.
//!
//! Horizon Foundry uses the `tracing` crate for instrumentation. The engine
//! never installs a subscriber of its own; to see logs, install one in your
//! application:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! The constants below can be used with `tracing` filter directives to
//! narrow output to a specific subsystem, e.g.
//! `RUST_LOG=horizon_foundry_core::scheduler=trace`.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core engine target.
    pub const CORE: &str = "horizon_foundry_core";
    /// Engine lifecycle target.
    pub const ENGINE: &str = "horizon_foundry_core::engine";
    /// Scheduler loop target.
    pub const SCHEDULER: &str = "horizon_foundry_core::scheduler";
    /// Worker pool target.
    pub const WORKER: &str = "horizon_foundry_core::worker";
    /// Completion bus target.
    pub const BUS: &str = "horizon_foundry_core::bus";
}
