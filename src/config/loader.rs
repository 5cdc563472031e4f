//! Configuration loading from disk.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::BridgeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `admin.api_key`.
pub const ADMIN_API_KEY_ENV_VAR: &str = "BRIDGE_ADMIN_API_KEY";

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
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<BridgeConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load the file if it exists, otherwise start from defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<BridgeConfig, ConfigError> {
    match path {
        Some(path) if path.exists() => load_config(path),
        Some(path) => {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            finish(BridgeConfig::default())
        }
        None => finish(BridgeConfig::default()),
    }
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<BridgeConfig, ConfigError> {
    let config: BridgeConfig = toml::from_str(content)?;
    finish(config)
}

fn finish(mut config: BridgeConfig) -> Result<BridgeConfig, ConfigError> {
    if let Ok(key) = std::env::var(ADMIN_API_KEY_ENV_VAR) {
        if !key.is_empty() {
            config.admin.api_key = key;
        }
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
