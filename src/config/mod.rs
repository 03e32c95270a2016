//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)          backend list file
//!     → loader.rs (parse)         → loader.rs (one URL per line)
//!     → CLI overrides applied (main.rs)
//!     → validation.rs (semantic checks)
//!     → BalancerConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{
    AdminConfig, BalancerConfig, HealthCheckConfig, ObservabilityConfig, QueueConfig,
    RecoveryConfig, ServiceConfig,
};
