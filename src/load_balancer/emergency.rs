//! Emergency requeue.
//!
//! Work items displaced by an instance removal land here and are pushed back
//! into a surviving instance's queue, keeping their original responder, so
//! the waiting caller only sees added latency.
//!
//! While the pool is empty the worker holds the current item until an
//! instance is added or the Recovery hold deadline passes. The deadline is
//! shared by every item held during one Recovery episode.

use axum::http::StatusCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::BalancerError;
use crate::load_balancer::{LoadBalancer, WorkItem};
use crate::observability::metrics;

/// Producer side of the emergency queue.
#[derive(Debug, Clone)]
pub struct EmergencyQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
}

impl EmergencyQueue {
    pub fn channel() -> (Self, RequeueWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = RequeueWorker { rx, held: None };
        (Self { tx }, worker)
    }

    /// Hand over a displaced item.
    pub fn push(&self, item: WorkItem) {
        if let Err(mpsc::error::SendError(item)) = self.tx.send(item) {
            // Only happens once the requeue worker is gone (runtime shutdown).
            tracing::warn!(request_id = %item.request_id(), "Emergency queue closed, rejecting request");
            item.reject(StatusCode::SERVICE_UNAVAILABLE, "Load balancer shutting down");
        }
    }
}

/// The long-lived task draining the emergency queue.
#[derive(Debug)]
pub struct RequeueWorker {
    rx: mpsc::UnboundedReceiver<WorkItem>,
    /// Recovery episode the worker is holding for, and when holding began.
    held: Option<(u64, Instant)>,
}

impl RequeueWorker {
    pub(crate) async fn run(mut self, balancer: Arc<LoadBalancer>) {
        tracing::info!(service = %balancer.name(), "Emergency requeue worker running");

        while let Some(item) = self.rx.recv().await {
            self.reroute(&balancer, item).await;
        }

        tracing::info!("Emergency queue closed, requeue worker exiting");
    }

    async fn reroute(&mut self, balancer: &LoadBalancer, mut item: WorkItem) {
        item.mark_rerouted();

        loop {
            match balancer.select() {
                Ok(instance) => {
                    if self.held.take().is_some() {
                        tracing::info!("Backends available again, releasing held requests");
                    }
                    match instance.submit(item).await {
                        Ok(()) => {
                            tracing::info!(
                                instance = %instance.id(),
                                target = %instance.target(),
                                "Request recovered and passed to instance"
                            );
                            metrics::record_reroute();
                            return;
                        }
                        Err(returned) => {
                            // The chosen instance is being removed right now.
                            item = returned;
                            tokio::task::yield_now().await;
                        }
                    }
                }
                Err(BalancerError::NoBackendsAvailable) => {
                    let since = self.hold_started(balancer);
                    let deadline = balancer.hold_timeout().map(|timeout| since + timeout);

                    tracing::debug!(request_id = %item.request_id(), "No backends, holding request");
                    if !balancer.wait_for_normal(deadline).await {
                        tracing::warn!(
                            request_id = %item.request_id(),
                            "Recovery hold expired, rejecting rerouted request"
                        );
                        metrics::record_rejected("recovery");
                        item.reject(StatusCode::SERVICE_UNAVAILABLE, "No backends available");
                        return;
                    }
                }
                Err(error) => {
                    tracing::error!(request_id = %item.request_id(), error = %error, "Reroute failed");
                    item.reject(StatusCode::INTERNAL_SERVER_ERROR, "Reroute failed");
                    return;
                }
            }
        }
    }

    /// When holding began in the current Recovery episode.
    fn hold_started(&mut self, balancer: &LoadBalancer) -> Instant {
        let (_, episode) = balancer.recovery_episode();
        if let Some((held_episode, since)) = self.held {
            if held_episode == episode {
                return since;
            }
        }
        let now = Instant::now();
        self.held = Some((episode, now));
        now
    }

    /// Next displaced item without waiting.
    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<WorkItem> {
        self.rx.try_recv().ok()
    }
}
