//! Round-robin load balancing strategy.

use std::sync::Mutex;

use crate::error::BalancerError;
use crate::load_balancer::{Strategy, TotalUpdate};

/// Round-robin selector.
///
/// `total` and `cursor` sit behind separate locks because the request path
/// and the membership path touch them from different call sites. Whenever
/// both are needed, `total` is locked first.
#[derive(Debug)]
pub struct RoundRobin {
    total: Mutex<usize>,
    cursor: Mutex<Option<usize>>,
}

impl RoundRobin {
    /// Start before the first position so the first `next()` returns 0.
    pub fn new(total: usize) -> Self {
        Self {
            total: Mutex::new(total),
            cursor: Mutex::new(None),
        }
    }
}

impl Strategy for RoundRobin {
    fn next(&self) -> Result<usize, BalancerError> {
        let total = *self.total.lock().expect("round-robin total poisoned");
        if total == 0 {
            return Err(BalancerError::NoBackendsAvailable);
        }

        let mut cursor = self.cursor.lock().expect("round-robin cursor poisoned");
        let next = cursor.map_or(0, |c| (c + 1) % total);
        *cursor = Some(next);
        Ok(next)
    }

    fn update_total(&self, update: TotalUpdate) {
        let mut total = self.total.lock().expect("round-robin total poisoned");
        *total = match update {
            TotalUpdate::Set(value) => value,
            TotalUpdate::Decrement => total.saturating_sub(1),
        };

        let mut cursor = self.cursor.lock().expect("round-robin cursor poisoned");
        if matches!(*cursor, Some(c) if c >= *total) {
            *cursor = Some(0);
        }
    }

    fn total(&self) -> usize {
        *self.total.lock().expect("round-robin total poisoned")
    }

    fn current(&self) -> Option<usize> {
        *self.cursor.lock().expect("round-robin cursor poisoned")
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
