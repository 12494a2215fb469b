//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.http.address, "127.0.0.1:8080");
        assert_eq!(config.http.internal_error_code, 500);
        assert_eq!(config.timeouts.request_secs, 60);
        assert_eq!(config.uploads.forbid, vec![".php", ".exe", ".bat", ".sh"]);
        assert!(!config.http.trusted_subnets.is_empty());
    }

    #[test]
    fn sections_override_defaults() {
        let config = parse_config(
            r#"
            [http]
            address = "0.0.0.0:9000"
            max_request_size = 2
            raw_body = true
            trusted_subnets = ["192.168.1.0/24"]

            [uploads]
            allow = [".png"]

            [permissions]
            uid = 33
            "#,
        )
        .unwrap();

        assert_eq!(config.http.address, "0.0.0.0:9000");
        assert_eq!(config.http.max_request_bytes(), Some(2 * 1024 * 1024));
        assert!(config.http.raw_body);
        assert_eq!(config.http.trusted_subnets.len(), 1);
        assert_eq!(config.uploads.allow, vec![".png"]);
        assert_eq!(config.permissions.uid, Some(33));
        assert_eq!(config.permissions.gid, None);
    }

    #[test]
    fn bad_subnet_is_a_parse_error() {
        let err = parse_config("[http]\ntrusted_subnets = [\"not-a-net\"]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn validation_errors_are_collected() {
        let err = parse_config(
            r#"
            [http]
            address = "nowhere"
            internal_error_code = 42
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }
}
