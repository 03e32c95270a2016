//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the strategy name and every backend URL
//! - Reject duplicate backend addresses
//! - Validate value ranges (timeouts > 0, capacity > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::load_balancer::instance::Target;
use crate::load_balancer::STRATEGIES;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error("no backends configured")]
    NoBackends,

    #[error("invalid backend '{url}': {reason}")]
    InvalidBackend { url: String, reason: String },

    #[error("duplicate backend address '{0}'")]
    DuplicateBackend(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("admin API enabled with an empty api_key")]
    EmptyApiKey,
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !STRATEGIES.contains(&config.service.strategy.as_str()) {
        errors.push(ValidationError::UnknownStrategy(config.service.strategy.clone()));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut seen = HashSet::new();
    for url in &config.backends {
        match Target::parse(url) {
            Ok(target) => {
                if !seen.insert(target.authority().to_string()) {
                    errors.push(ValidationError::DuplicateBackend(target.authority().to_string()));
                }
            }
            Err(e) => errors.push(ValidationError::InvalidBackend {
                url: url.clone(),
                reason: e.to_string(),
            }),
        }
    }

    if config.queues.instance_capacity == 0 {
        errors.push(ValidationError::Zero("queues.instance_capacity"));
    }
    if config.health_check.request_timeout_ms == 0 {
        errors.push(ValidationError::Zero("health_check.request_timeout_ms"));
    }
    if config.health_check.startup_timeout_ms == 0 {
        errors.push(ValidationError::Zero("health_check.startup_timeout_ms"));
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::EmptyApiKey);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(backends: &[&str]) -> BalancerConfig {
        BalancerConfig {
            backends: backends.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let config = config_with(&["http://127.0.0.1:8080", "http://127.0.0.1:8081"]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = config_with(&["http://127.0.0.1:8080", "http://127.0.0.1:8080", "not a url"]);
        config.service.strategy = "least-conn".into();
        config.queues.instance_capacity = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::UnknownStrategy("least-conn".into())));
        assert!(errors.contains(&ValidationError::DuplicateBackend("127.0.0.1:8080".into())));
        assert!(errors.contains(&ValidationError::Zero("queues.instance_capacity")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidBackend { url, .. } if url == "not a url")));
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_empty_backends() {
        let errors = validate_config(&config_with(&[])).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoBackends]);
    }
}
