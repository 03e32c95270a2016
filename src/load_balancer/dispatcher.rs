//! The dispatcher: request admission and pool membership.
//!
//! # Responsibilities
//! - Admit inbound requests into the selected instance's queue
//! - Run the startup health sweep
//! - Remove failed instances without losing any queued work
//! - Let an operator add instances (the way out of Recovery)
//! - Report fatal invariant violations to whoever runs the balancer

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

use crate::config::BalancerConfig;
use crate::error::BalancerError;
use crate::health::probe;
use crate::http::Forwarder;
use crate::load_balancer::emergency::{EmergencyQueue, RequeueWorker};
use crate::load_balancer::instance::{InstanceQueue, InstanceWorker, WorkerExit};
use crate::load_balancer::pool::{Pool, Removal};
use crate::load_balancer::{
    build_strategy, Instance, InstanceId, Mode, Strategy, Target, TotalUpdate, WorkItem,
};
use crate::observability::metrics;

/// Fatal errors raised by background tasks after [`LoadBalancer::start`].
#[derive(Debug)]
pub struct FatalErrors {
    rx: mpsc::UnboundedReceiver<BalancerError>,
}

impl FatalErrors {
    /// Wait for the next fatal error.
    pub async fn recv(&mut self) -> Option<BalancerError> {
        self.rx.recv().await
    }
}

/// Owns the pool, the strategy, the mode and the emergency queue.
#[derive(Debug)]
pub struct LoadBalancer {
    name: String,
    pool: Pool,
    strategy: Box<dyn Strategy>,
    emergency: EmergencyQueue,
    forwarder: Forwarder,
    probe_timeout: Duration,
    startup_timeout: Duration,
    hold_timeout: Option<Duration>,
    /// Queues whose workers have not been spawned yet; `None` once started.
    pending: Mutex<Option<Vec<InstanceQueue>>>,
    requeue: Mutex<Option<RequeueWorker>>,
    fatal_tx: mpsc::UnboundedSender<BalancerError>,
    fatal_rx: Mutex<Option<mpsc::UnboundedReceiver<BalancerError>>>,
}

impl LoadBalancer {
    /// Build the balancer from configuration. Nothing runs until [`start`](Self::start).
    pub fn new(config: &BalancerConfig) -> Result<Arc<Self>, BalancerError> {
        let pool = Pool::new(config.queues.instance_capacity);
        let mut pending = Vec::with_capacity(config.backends.len());
        for url in &config.backends {
            let insertion = pool.insert(Target::parse(url)?)?;
            tracing::debug!(
                instance = %insertion.instance.id(),
                target = %insertion.instance.target(),
                "Instance registered"
            );
            pending.push(insertion.queue);
        }

        let strategy = build_strategy(&config.service.strategy, pool.len())?;
        let (emergency, requeue) = EmergencyQueue::channel();
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        let hold_timeout = match config.recovery.hold_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        metrics::set_pool_size(pool.len());
        metrics::set_mode(Mode::Normal);

        Ok(Arc::new(Self {
            name: config.service.name.clone(),
            pool,
            strategy,
            emergency,
            forwarder: Forwarder::new(),
            probe_timeout: Duration::from_millis(config.health_check.request_timeout_ms),
            startup_timeout: Duration::from_millis(config.health_check.startup_timeout_ms),
            hold_timeout,
            pending: Mutex::new(Some(pending)),
            requeue: Mutex::new(Some(requeue)),
            fatal_tx,
            fatal_rx: Mutex::new(Some(fatal_rx)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> &dyn Strategy {
        self.strategy.as_ref()
    }

    pub fn mode(&self) -> Mode {
        self.pool.mode()
    }

    /// Observe mode transitions.
    pub fn subscribe_mode(&self) -> watch::Receiver<Mode> {
        self.pool.subscribe_mode()
    }

    /// Current mode and the number of Recovery episodes started so far.
    pub(crate) fn recovery_episode(&self) -> (Mode, u64) {
        self.pool.recovery_episode()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Live instances in pool order.
    pub fn instances(&self) -> Vec<Instance> {
        self.pool.snapshot()
    }

    pub(crate) fn hold_timeout(&self) -> Option<Duration> {
        self.hold_timeout
    }

    /// Probe every configured backend once and drop those that do not answer.
    ///
    /// Returns the number of live instances. If nothing answers the pool is
    /// left as it was and the sweep fails: that is a fatal startup
    /// condition, not Recovery.
    pub async fn initial_sweep(&self) -> Result<usize, BalancerError> {
        let configured = self.pool.snapshot();
        let mut dead = Vec::new();
        for instance in &configured {
            match probe::dial(instance.target(), self.startup_timeout).await {
                Ok(()) => {
                    tracing::info!(instance = %instance.id(), target = %instance.target(), "Instance is responding");
                }
                Err(error) => {
                    tracing::warn!(instance = %instance.id(), error = %error, "Instance is not responding");
                    dead.push(instance.id());
                }
            }
        }

        if dead.len() == configured.len() {
            tracing::error!(service = %self.name, "No instance is responding, check your servers");
            return Err(BalancerError::NoBackendsAvailable);
        }

        for id in dead {
            let queue = self.take_pending(id)?;
            self.remove_instance(queue, None).await?;
        }
        Ok(self.pool.len())
    }

    /// Spawn one worker per instance plus the emergency requeue worker.
    pub fn start(self: &Arc<Self>) -> Result<FatalErrors, BalancerError> {
        let fatal_rx = self
            .fatal_rx
            .lock()
            .expect("fatal channel lock poisoned")
            .take()
            .ok_or_else(|| BalancerError::InvariantViolation("load balancer started twice".into()))?;

        let requeue = self
            .requeue
            .lock()
            .expect("requeue lock poisoned")
            .take()
            .ok_or_else(|| BalancerError::InvariantViolation("requeue worker already taken".into()))?;
        tokio::spawn(requeue.run(Arc::clone(self)));

        let queues = self
            .pending
            .lock()
            .expect("pending queues lock poisoned")
            .take()
            .unwrap_or_default();
        for queue in queues {
            self.spawn_worker(queue);
        }

        tracing::info!(
            service = %self.name,
            strategy = self.strategy.name(),
            instances = self.pool.len(),
            "Load balancer started"
        );
        Ok(FatalErrors { rx: fatal_rx })
    }

    fn spawn_worker(self: &Arc<Self>, queue: InstanceQueue) {
        let worker = InstanceWorker::new(queue, self.forwarder.clone(), self.probe_timeout);
        let balancer = Arc::clone(self);

        tokio::spawn(async move {
            if let WorkerExit::Unreachable { queue, in_flight, error } = worker.run().await {
                tracing::warn!(instance = %queue.id(), error = %error, "Removing unreachable instance");
                if let Err(e) = balancer.remove_instance(queue, Some(in_flight)).await {
                    balancer.report_fatal(e);
                }
            }
        });
    }

    pub(crate) fn take_pending(&self, id: InstanceId) -> Result<InstanceQueue, BalancerError> {
        let mut pending = self.pending.lock().expect("pending queues lock poisoned");
        let queues = pending.as_mut().ok_or_else(|| {
            BalancerError::InvariantViolation(format!("instance {} already has a running worker", id))
        })?;
        let position = queues.iter().position(|q| q.id() == id).ok_or_else(|| {
            BalancerError::InvariantViolation(format!("no pending queue for instance {}", id))
        })?;
        Ok(queues.remove(position))
    }

    #[cfg(test)]
    pub(crate) fn take_requeue(&self) -> RequeueWorker {
        self.requeue
            .lock()
            .expect("requeue lock poisoned")
            .take()
            .expect("requeue worker already taken")
    }

    fn report_fatal(&self, error: BalancerError) {
        tracing::error!(error = %error, "Fatal load balancer error");
        if self.fatal_tx.send(error).is_err() {
            tracing::error!("Nobody is listening for fatal errors");
        }
    }

    /// Handle one inbound request. Returns once some instance forwarded it,
    /// or with 503 if the pool stayed empty past the Recovery hold timeout.
    pub async fn dispatch(&self, request: Request<Body>) -> Response<Body> {
        let (item, completion) = WorkItem::new(request);
        self.admit(item).await;
        completion.wait().await
    }

    async fn admit(&self, mut item: WorkItem) {
        loop {
            match self.select() {
                Ok(instance) => {
                    if let Err(returned) = instance.submit(item).await {
                        tracing::debug!(
                            instance = %instance.id(),
                            request_id = %returned.request_id(),
                            "Instance queue closed, handing request to emergency queue"
                        );
                        self.emergency.push(returned);
                    }
                    return;
                }
                Err(BalancerError::NoBackendsAvailable) => {
                    let deadline = self.hold_timeout.map(|timeout| Instant::now() + timeout);
                    tracing::debug!(request_id = %item.request_id(), "Recovery mode, holding request");
                    if !self.wait_for_normal(deadline).await {
                        metrics::record_rejected("recovery");
                        item.reject(StatusCode::SERVICE_UNAVAILABLE, "No backends available");
                        return;
                    }
                }
                Err(error) => {
                    tracing::error!(request_id = %item.request_id(), error = %error, "Dispatch failed");
                    item.reject(StatusCode::INTERNAL_SERVER_ERROR, "Dispatch failed");
                    return;
                }
            }
        }
    }

    /// Ask the strategy for an instance.
    pub(crate) fn select(&self) -> Result<Instance, BalancerError> {
        loop {
            let index = self.strategy.next()?;
            if let Some(instance) = self.pool.get(index) {
                return Ok(instance);
            }
            // A removal has compacted the pool but not yet updated the strategy.
            self.strategy.update_total(TotalUpdate::Set(self.pool.len()));
        }
    }

    /// Wait until the mode is Normal. `false` if the deadline passed first.
    pub(crate) async fn wait_for_normal(&self, deadline: Option<Instant>) -> bool {
        let mut rx = self.pool.subscribe_mode();
        let normal = async move { rx.wait_for(|mode| *mode == Mode::Normal).await.is_ok() };
        match deadline {
            Some(deadline) => time::timeout_at(deadline, normal).await.unwrap_or(false),
            None => normal.await,
        }
    }

    /// Take a failed instance out of the pool.
    ///
    /// The queue is closed first, then the in-flight item and the whole
    /// backlog go to the emergency queue in order, and only then is the
    /// instance removed and the strategy resized.
    pub(crate) async fn remove_instance(
        &self,
        mut queue: InstanceQueue,
        in_flight: Option<WorkItem>,
    ) -> Result<Removal, BalancerError> {
        let id = queue.id();
        let target = queue.target().to_string();

        queue.close();

        let mut displaced = 0usize;
        if let Some(item) = in_flight {
            self.emergency.push(item);
            displaced += 1;
        }
        while let Some(item) = queue.recv().await {
            self.emergency.push(item);
            displaced += 1;
        }

        let removal = self.pool.remove(id)?;
        self.strategy.update_total(TotalUpdate::Set(removal.remaining));

        tracing::warn!(
            instance = %id,
            target = %target,
            displaced,
            remaining = removal.remaining,
            "Instance removed from pool"
        );
        metrics::record_instance_removed(&target);
        metrics::set_pool_size(removal.remaining);

        if removal.entered_recovery {
            tracing::error!(service = %self.name, "No instances left, switched to recovery mode");
        }
        Ok(removal)
    }

    /// Add a backend to the pool. Ends Recovery if the pool was empty.
    pub fn add_instance(self: &Arc<Self>, url: &str) -> Result<InstanceId, BalancerError> {
        let target = Target::parse(url)?;
        let insertion = self.pool.insert(target)?;
        let id = insertion.instance.id();
        self.strategy.update_total(TotalUpdate::Set(insertion.total));

        {
            let mut pending = self.pending.lock().expect("pending queues lock poisoned");
            match pending.as_mut() {
                Some(queues) => queues.push(insertion.queue),
                None => self.spawn_worker(insertion.queue),
            }
        }

        tracing::info!(instance = %id, target = %insertion.instance.target(), total = insertion.total, "Instance added");
        metrics::set_pool_size(insertion.total);

        if insertion.left_recovery {
            tracing::info!(service = %self.name, "Instance added, switched back to normal mode");
        }
        Ok(id)
    }
}
