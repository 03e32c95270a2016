//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Build balancer → Startup sweep → Start workers → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Fail fast: zero live backends after the sweep is fatal
//! - An invariant violation reported by a worker ends the process

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
