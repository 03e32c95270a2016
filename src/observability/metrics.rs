//! Metrics collection and exposition.
//!
//! # Metrics
//! - `balancer_requests_total` (counter): requests by method, status
//! - `balancer_request_duration_seconds` (histogram): end-to-end latency
//! - `balancer_reroutes_total` (counter): items passed through the emergency queue
//! - `balancer_instances_removed_total` (counter): removals by address
//! - `balancer_pool_size` (gauge): live instances
//! - `balancer_recovery_mode` (gauge): 1 while the pool is empty
//! - `balancer_rejected_total` (counter): requests answered by the balancer itself

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::load_balancer::Mode;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "balancer_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("balancer_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_reroute() {
    metrics::counter!("balancer_reroutes_total").increment(1);
}

pub fn record_instance_removed(address: &str) {
    metrics::counter!("balancer_instances_removed_total", "address" => address.to_string()).increment(1);
}

pub fn record_rejected(reason: &'static str) {
    metrics::counter!("balancer_rejected_total", "reason" => reason).increment(1);
}

pub fn set_pool_size(size: usize) {
    metrics::gauge!("balancer_pool_size").set(size as f64);
}

pub fn set_mode(mode: Mode) {
    let recovery = match mode {
        Mode::Normal => 0.0,
        Mode::Recovery => 1.0,
    };
    metrics::gauge!("balancer_recovery_mode").set(recovery);
}
