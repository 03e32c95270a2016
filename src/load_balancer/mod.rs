//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → dispatcher.rs (wrap in a WorkItem, ask the Strategy for an index)
//!     → pool.rs (resolve index → Instance under a read lock)
//!     → instance.rs (bounded queue; worker probes, forwards, completes)
//!
//! Instance probe fails
//!     → instance.rs worker stops, returns in-flight item + queue
//!     → dispatcher.rs removal protocol (close, hand off, drain, remove)
//!     → emergency.rs (requeue every displaced item via the Strategy)
//! ```
//!
//! # Design Decisions
//! - Instances are identified by a stable InstanceId, never by position
//! - One worker per instance serializes all traffic to that backend
//! - An empty pool is Recovery mode, not a crash

pub mod dispatcher;
pub mod emergency;
pub mod instance;
pub mod pool;
pub mod round_robin;
pub mod work;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BalancerError;
use self::round_robin::RoundRobin;

pub use dispatcher::LoadBalancer;
pub use instance::{Instance, InstanceId, Target};
pub use work::{Completion, WorkItem};

/// Names accepted by [`build_strategy`].
pub const STRATEGIES: &[&str] = &["round-robin"];

/// How a strategy's tracked pool size should change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalUpdate {
    Set(usize),
    Decrement,
}

/// Pluggable backend selection.
///
/// Implementations must tolerate concurrent calls from the request path and
/// the membership-mutation path.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Index of the next instance to use.
    fn next(&self) -> Result<usize, BalancerError>;

    /// Keep the tracked pool size in step with the pool.
    fn update_total(&self, update: TotalUpdate);

    /// Tracked pool size.
    fn total(&self) -> usize;

    /// Last selected position, `None` before the first selection.
    fn current(&self) -> Option<usize>;

    fn name(&self) -> &'static str;
}

/// Build a strategy by name for a pool of `total` instances.
pub fn build_strategy(name: &str, total: usize) -> Result<Box<dyn Strategy>, BalancerError> {
    match name {
        "round-robin" => Ok(Box::new(RoundRobin::new(total))),
        other => Err(BalancerError::Configuration(format!(
            "unknown strategy '{}'",
            other
        ))),
    }
}

/// Process-wide balancer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// At least one instance is live.
    Normal,
    /// The pool is empty; dispatch is held until an operator adds an instance.
    Recovery,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::Recovery => write!(f, "recovery"),
        }
    }
}
