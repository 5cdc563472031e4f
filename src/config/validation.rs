//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check chain references against the built-in chain table
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::chains::ChainRegistry;
use crate::config::schema::BridgeConfig;

/// One semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    let session = &config.session;
    if session.auto_lock_secs == 0 {
        errors.push(ValidationError::new("session.auto_lock_secs", "must be > 0"));
    }
    if session.check_interval_secs == 0 {
        errors.push(ValidationError::new("session.check_interval_secs", "must be > 0"));
    }
    if session.max_failed_attempts == 0 {
        errors.push(ValidationError::new("session.max_failed_attempts", "must be > 0"));
    }
    if session.lockout_secs == 0 {
        errors.push(ValidationError::new("session.lockout_secs", "must be > 0"));
    }

    let registry = ChainRegistry::builtin();
    if !registry.is_supported(config.chains.default_chain_id) {
        errors.push(ValidationError::new(
            "chains.default_chain_id",
            format!("chain {} is not supported", config.chains.default_chain_id),
        ));
    }
    if config.chains.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("chains.rpc_timeout_secs", "must be > 0"));
    }
    for o in &config.chains.overrides {
        if !registry.is_supported(o.chain_id) {
            errors.push(ValidationError::new(
                "chains.overrides",
                format!("chain {} is not supported", o.chain_id),
            ));
        }
        for url in o.rpc_url.iter().chain(o.failover_urls.iter()) {
            if url::Url::parse(url).is_err() {
                errors.push(ValidationError::new(
                    "chains.overrides",
                    format!("'{}' is not a valid URL", url),
                ));
            }
        }
    }

    let tx = &config.transactions;
    if !(tx.slow_percent > 0 && tx.slow_percent <= tx.standard_percent && tx.standard_percent <= tx.fast_percent) {
        errors.push(ValidationError::new(
            "transactions",
            "fee tiers must satisfy 0 < slow <= standard <= fast",
        ));
    }
    if tx.fallback_native_gas_limit < 21_000 {
        errors.push(ValidationError::new(
            "transactions.fallback_native_gas_limit",
            "must be at least 21000",
        ));
    }
    if tx.fallback_call_gas_limit < tx.fallback_native_gas_limit {
        errors.push(ValidationError::new(
            "transactions.fallback_call_gas_limit",
            "must not be lower than the native fallback",
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
