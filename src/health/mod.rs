//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Startup sweep (load_balancer::dispatcher):
//!     every configured backend → probe.rs (5s dial)
//!     → failures removed before traffic is accepted
//!
//! Per-request check (load_balancer::instance worker):
//!     before each forward → probe.rs (2s dial)
//!     → failure stops the worker and triggers removal
//! ```
//!
//! # Design Decisions
//! - A single failed dial is enough to remove an instance
//! - Removed instances only come back through the admin API

pub mod probe;
