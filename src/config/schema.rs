//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Service identity, listen port and strategy.
    pub service: ServiceConfig,

    /// Backend base URLs (`http://host:port`), in pool order.
    pub backends: Vec<String>,

    /// Health-check dial timeouts.
    pub health_check: HealthCheckConfig,

    /// Per-instance queue sizing.
    pub queues: QueueConfig,

    /// Behaviour while the pool is empty.
    pub recovery: RecoveryConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Operator admin surface.
    pub admin: AdminConfig,
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name, used for identification in logs only.
    pub name: String,

    /// Host part of the listen address.
    pub bind_host: String,

    /// Listen port.
    pub port: u16,

    /// Backend selection strategy (only "round-robin" is recognised).
    pub strategy: String,
}

impl ServiceConfig {
    /// The `host:port` the HTTP listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "load_balancer".to_string(),
            bind_host: "0.0.0.0".to_string(),
            port: 1234,
            strategy: "round-robin".to_string(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Dial timeout for the probe run before every forwarded request.
    pub request_timeout_ms: u64,

    /// Dial timeout for the startup sweep.
    pub startup_timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 2_000,
            startup_timeout_ms: 5_000,
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of each instance's work queue (backpressure bound).
    pub instance_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            instance_capacity: 100,
        }
    }
}

/// Recovery mode configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// How long a request may be held while the pool is empty before it is
    /// answered with 503. Zero holds indefinitely.
    pub hold_timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            hold_timeout_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
