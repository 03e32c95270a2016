//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the ordered set of live instances together with the balancer mode
//! - Resolve strategy positions to instances for the request path
//! - Insert and remove instances by stable id under the exclusive lock
//!
//! # Design Decisions
//! - Positions are only meaningful inside a single locked operation
//! - Mode sits behind the same lock as the instance list, so "pool empty"
//!   and "Recovery" can never disagree
//! - Mode changes are published to watchers before the write lock is released
//! - The lock is never held across an await

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::watch;

use crate::error::BalancerError;
use crate::load_balancer::instance::{Instance, InstanceId, InstanceQueue, Target};
use crate::load_balancer::Mode;
use crate::observability::metrics;

#[derive(Debug)]
struct PoolState {
    instances: Vec<Instance>,
    mode: Mode,
    /// Number of times the pool has entered Recovery.
    episode: u64,
}

/// Outcome of an instance removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Pool size after the removal.
    pub remaining: usize,
    /// This removal emptied the pool and moved the balancer to Recovery.
    pub entered_recovery: bool,
}

/// Outcome of an instance insertion.
#[derive(Debug)]
pub struct Insertion {
    pub instance: Instance,
    pub queue: InstanceQueue,
    /// Pool size after the insertion.
    pub total: usize,
    /// This insertion ended Recovery.
    pub left_recovery: bool,
}

/// The ordered set of live backends.
#[derive(Debug)]
pub struct Pool {
    state: RwLock<PoolState>,
    mode_tx: watch::Sender<Mode>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Pool {
    /// Create an empty pool whose instances get queues of `queue_capacity`.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: RwLock::new(PoolState {
                instances: Vec::new(),
                mode: Mode::Normal,
                episode: 0,
            }),
            mode_tx: watch::channel(Mode::Normal).0,
            next_id: AtomicU64::new(1),
            queue_capacity,
        }
    }

    /// Add a backend at the end of the pool.
    ///
    /// Fails if a live instance already has the same address.
    pub fn insert(&self, target: Target) -> Result<Insertion, BalancerError> {
        let mut state = self.state.write().expect("pool lock poisoned");

        if state
            .instances
            .iter()
            .any(|i| i.target().authority() == target.authority())
        {
            return Err(BalancerError::Configuration(format!(
                "backend {} is already in the pool",
                target.authority()
            )));
        }

        let id = InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (instance, queue) = Instance::new(id, target, self.queue_capacity);
        state.instances.push(instance.clone());

        let left_recovery = state.mode == Mode::Recovery;
        if left_recovery {
            state.mode = Mode::Normal;
            self.publish(Mode::Normal);
        }

        Ok(Insertion {
            instance,
            queue,
            total: state.instances.len(),
            left_recovery,
        })
    }

    /// Remove an instance by id, compacting the sequence in place.
    ///
    /// An id that is not in the pool means the caller's bookkeeping is
    /// broken; that is reported as an invariant violation.
    pub fn remove(&self, id: InstanceId) -> Result<Removal, BalancerError> {
        let mut state = self.state.write().expect("pool lock poisoned");

        let position = state
            .instances
            .iter()
            .position(|i| i.id() == id)
            .ok_or_else(|| {
                BalancerError::InvariantViolation(format!(
                    "instance {} is not in the pool ({} live)",
                    id,
                    state.instances.len()
                ))
            })?;
        state.instances.remove(position);

        let remaining = state.instances.len();
        let entered_recovery = remaining == 0 && state.mode == Mode::Normal;
        if entered_recovery {
            state.mode = Mode::Recovery;
            state.episode += 1;
            self.publish(Mode::Recovery);
        }

        Ok(Removal {
            remaining,
            entered_recovery,
        })
    }

    /// Instance at a strategy position, `None` if out of range.
    pub fn get(&self, index: usize) -> Option<Instance> {
        let state = self.state.read().expect("pool lock poisoned");
        state.instances.get(index).cloned()
    }

    pub fn find(&self, id: InstanceId) -> Option<Instance> {
        let state = self.state.read().expect("pool lock poisoned");
        state.instances.iter().find(|i| i.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("pool lock poisoned").instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mode(&self) -> Mode {
        self.state.read().expect("pool lock poisoned").mode
    }

    /// Current mode and how many Recovery episodes have started so far.
    pub fn recovery_episode(&self) -> (Mode, u64) {
        let state = self.state.read().expect("pool lock poisoned");
        (state.mode, state.episode)
    }

    /// Observe mode transitions.
    pub fn subscribe_mode(&self) -> watch::Receiver<Mode> {
        self.mode_tx.subscribe()
    }

    // Called with the write lock held.
    fn publish(&self, mode: Mode) {
        self.mode_tx.send_replace(mode);
        metrics::set_mode(mode);
    }

    /// Consistent copy of the pool, in order.
    pub fn snapshot(&self) -> Vec<Instance> {
        self.state.read().expect("pool lock poisoned").instances.clone()
    }
}
