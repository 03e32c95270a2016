//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML file into a configuration. Validation is left to the caller
/// so that CLI overrides can be applied first.
pub fn load_config(path: &Path) -> Result<BalancerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: BalancerConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Validate a fully assembled configuration.
pub fn finalize(config: BalancerConfig) -> Result<BalancerConfig, ConfigError> {
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Read a backend list file: one URL per line.
pub fn load_backend_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(parse_backend_list(&content))
}

/// Blank lines and `#` comments are skipped.
pub fn parse_backend_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_list() {
        let content = "\
# local demo servers
http://127.0.0.1:8080

  http://127.0.0.1:8081
http://127.0.0.1:8082
";
        assert_eq!(
            parse_backend_list(content),
            vec![
                "http://127.0.0.1:8080",
                "http://127.0.0.1:8081",
                "http://127.0.0.1:8082",
            ]
        );
    }

    #[test]
    fn test_finalize_reports_validation() {
        let err = finalize(BalancerConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors == &vec![ValidationError::NoBackends]));
        assert_eq!(err.to_string(), "Validation failed: no backends configured");
    }
}
