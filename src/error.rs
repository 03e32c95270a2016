//! Error taxonomy of the dispatch-and-recovery core.
//!
//! Backend-level failures are recovered inside the core (removal + reroute).
//! Only configuration problems and invariant violations propagate out and
//! terminate the process.

use thiserror::Error;

/// Errors produced by the load balancer core.
#[derive(Debug, Error)]
pub enum BalancerError {
    /// Unknown strategy, unparseable backend URL, duplicate address.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The health-check dial to a backend failed or timed out.
    #[error("backend {address} unreachable: {source}")]
    BackendUnreachable {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Selection was attempted against an empty pool.
    #[error("no backends available")]
    NoBackendsAvailable,

    /// Pool bookkeeping referenced an instance that is not in the pool.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl BalancerError {
    /// Whether this error must bring the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BalancerError::Configuration(_) | BalancerError::InvariantViolation(_)
        )
    }
}
