//! Backend instances and their workers.
//!
//! # Responsibilities
//! - Represent a single backend (stable id, target address)
//! - Own the bounded FIFO queue of work items for that backend
//! - Run the worker loop: probe, forward, deliver; stop on probe failure
//!
//! # Design Decisions
//! - Exactly one consumer per queue, so per-backend order is arrival order
//! - A full queue suspends the producer; this is the backpressure bound
//! - The worker never drops queued work: on failure it hands the queue back

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use crate::error::BalancerError;
use crate::health::probe;
use crate::http::Forwarder;
use crate::load_balancer::WorkItem;

/// Stable identifier assigned when an instance is created. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u64);

impl InstanceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a backend lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    /// `host:port`, what the probe dials and what identifies the backend.
    authority: String,
}

impl Target {
    /// Parse a backend base URL such as `http://127.0.0.1:8080`.
    pub fn parse(raw: &str) -> Result<Self, BalancerError> {
        let url = Url::parse(raw.trim()).map_err(|e| {
            BalancerError::Configuration(format!("invalid backend URL '{}': {}", raw, e))
        })?;

        if url.scheme() != "http" {
            return Err(BalancerError::Configuration(format!(
                "unsupported scheme '{}' in backend URL '{}'",
                url.scheme(),
                raw
            )));
        }

        let host = url.host_str().ok_or_else(|| {
            BalancerError::Configuration(format!("backend URL '{}' has no host", raw))
        })?;
        let port = url.port_or_known_default().ok_or_else(|| {
            BalancerError::Configuration(format!("backend URL '{}' has no port", raw))
        })?;
        let authority = format!("{}:{}", host, port);

        Ok(Self { url, authority })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.url.scheme(), self.authority)
    }
}

/// Producer-side handle to a backend. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    target: Arc<Target>,
    sender: mpsc::Sender<WorkItem>,
}

impl Instance {
    /// Create an instance and the queue its worker will consume.
    pub(crate) fn new(id: InstanceId, target: Target, capacity: usize) -> (Self, InstanceQueue) {
        let (sender, receiver) = mpsc::channel(capacity);
        let target = Arc::new(target);
        let instance = Self {
            id,
            target: target.clone(),
            sender,
        };
        let queue = InstanceQueue {
            id,
            target,
            receiver,
        };
        (instance, queue)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Enqueue an item, waiting while the queue is full.
    ///
    /// If the queue has been closed the item is handed back.
    pub async fn submit(&self, item: WorkItem) -> Result<(), WorkItem> {
        self.sender.send(item).await.map_err(|e| e.0)
    }

    /// Items currently buffered.
    pub fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// The queue no longer accepts submissions.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer side of an instance's queue.
#[derive(Debug)]
pub struct InstanceQueue {
    id: InstanceId,
    target: Arc<Target>,
    receiver: mpsc::Receiver<WorkItem>,
}

impl InstanceQueue {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Next item in arrival order. After [`close`](Self::close) this yields
    /// the remaining backlog and then `None`.
    pub async fn recv(&mut self) -> Option<WorkItem> {
        self.receiver.recv().await
    }

    /// Stop accepting new submissions. Buffered items stay receivable.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Why a worker loop ended.
#[derive(Debug)]
pub(crate) enum WorkerExit {
    /// Every producer is gone and the queue is empty.
    Closed,
    /// The probe failed while `in_flight` was about to be forwarded.
    Unreachable {
        queue: InstanceQueue,
        in_flight: WorkItem,
        error: BalancerError,
    },
}

/// The long-lived task serializing all traffic to one backend.
pub(crate) struct InstanceWorker {
    queue: InstanceQueue,
    forwarder: Forwarder,
    probe_timeout: Duration,
}

impl InstanceWorker {
    pub(crate) fn new(queue: InstanceQueue, forwarder: Forwarder, probe_timeout: Duration) -> Self {
        Self {
            queue,
            forwarder,
            probe_timeout,
        }
    }

    pub(crate) async fn run(mut self) -> WorkerExit {
        let id = self.queue.id();
        tracing::info!(instance = %id, target = %self.queue.target(), "Instance worker running");

        while let Some(item) = self.queue.recv().await {
            if item.is_abandoned() {
                tracing::debug!(instance = %id, request_id = %item.request_id(), "Skipping abandoned request");
                continue;
            }

            if let Err(error) = probe::dial(self.queue.target(), self.probe_timeout).await {
                tracing::warn!(instance = %id, error = %error, "Health check failed, stopping worker");
                return WorkerExit::Unreachable {
                    queue: self.queue,
                    in_flight: item,
                    error,
                };
            }

            tracing::debug!(
                instance = %id,
                request_id = %item.request_id(),
                reroutes = item.reroutes(),
                "Forwarding request"
            );
            let (request, responder) = item.into_parts();
            let (response, delivery) = self.forwarder.forward(self.queue.target(), request).await;
            responder.respond(response);
            // The next item waits until this response has reached the caller.
            delivery.finished().await;
        }

        tracing::info!(instance = %id, "Instance queue closed, worker exiting");
        WorkerExit::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::work::test_item;

    fn instance(capacity: usize) -> (Instance, InstanceQueue) {
        let target = Target::parse("http://127.0.0.1:9").unwrap();
        Instance::new(InstanceId(7), target, capacity)
    }

    #[test]
    fn test_target_parse() {
        let target = Target::parse("http://localhost:8080/").unwrap();
        assert_eq!(target.authority(), "localhost:8080");
        assert_eq!(target.to_string(), "http://localhost:8080");

        let default_port = Target::parse("http://example.com").unwrap();
        assert_eq!(default_port.authority(), "example.com:80");

        assert!(Target::parse("https://example.com").is_err());
        assert!(Target::parse("localhost").is_err());
    }

    #[tokio::test]
    async fn test_backpressure_blocks_when_full() {
        let (instance, _queue) = instance(100);

        for i in 0..100 {
            let (item, _completion) = test_item(&format!("/{}", i));
            instance.submit(item).await.unwrap();
        }
        assert_eq!(instance.queued(), 100);

        let (item, _completion) = test_item("/overflow");
        let blocked = tokio::time::timeout(Duration::from_millis(100), instance.submit(item)).await;
        assert!(blocked.is_err(), "101st submit should wait for the worker");
    }

    #[tokio::test]
    async fn test_blocked_submit_resumes_on_progress() {
        let (instance, mut queue) = instance(1);
        let (first, _c1) = test_item("/first");
        instance.submit(first).await.unwrap();

        let producer = instance.clone();
        let pending = tokio::spawn(async move {
            let (second, _c2) = test_item("/second");
            producer.submit(second).await.is_ok()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        let popped = queue.recv().await.unwrap();
        assert_eq!(popped.request().uri().path(), "/first");
        assert!(pending.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_keeps_backlog_and_rejects_new_work() {
        let (instance, mut queue) = instance(10);
        for path in ["/a", "/b", "/c"] {
            let (item, _completion) = test_item(path);
            instance.submit(item).await.unwrap();
        }

        queue.close();
        assert!(instance.is_closed());

        let (late, _completion) = test_item("/late");
        let returned = instance.submit(late).await.unwrap_err();
        assert_eq!(returned.request().uri().path(), "/late");

        let mut drained = Vec::new();
        while let Some(item) = queue.recv().await {
            drained.push(item.request().uri().path().to_string());
        }
        assert_eq!(drained, vec!["/a", "/b", "/c"]);
        assert_eq!(instance.queued(), 0);
    }

    #[tokio::test]
    async fn test_worker_stops_on_unreachable_backend() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Target::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let (instance, queue) = Instance::new(InstanceId(1), target, 10);
        let (first, _c1) = test_item("/first");
        let (second, _c2) = test_item("/second");
        instance.submit(first).await.unwrap();
        instance.submit(second).await.unwrap();

        let worker = InstanceWorker::new(queue, Forwarder::new(), Duration::from_millis(500));
        match worker.run().await {
            WorkerExit::Unreachable { mut queue, in_flight, error } => {
                assert_eq!(in_flight.request().uri().path(), "/first");
                assert!(matches!(error, BalancerError::BackendUnreachable { .. }));
                queue.close();
                let rest = queue.recv().await.unwrap();
                assert_eq!(rest.request().uri().path(), "/second");
                assert!(queue.recv().await.is_none());
            }
            WorkerExit::Closed => panic!("worker should report the unreachable backend"),
        }
    }
}
