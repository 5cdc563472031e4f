//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the DApp provider bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// HTTP listener for page contexts and the approval surface.
    pub listener: ListenerConfig,

    /// Where durable state lives.
    pub storage: StorageConfig,

    /// Lock, auto-lock and lockout policy.
    pub session: SessionConfig,

    /// Active chain default and RPC endpoints.
    pub chains: ChainsConfig,

    /// Fee presets and gas limits.
    pub transactions: TransactionConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,

    /// Management API authentication.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8787").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8787".to_string(),
            max_body_bytes: 1024 * 1024,
            request_timeout_secs: 30,
        }
    }
}

/// Durable state locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding every state file.
    pub data_dir: PathBuf,

    /// Encrypted key store file name.
    pub keystore_file: String,

    /// Connection registry file name.
    pub connections_file: String,

    /// Active chain selection file name.
    pub active_chain_file: String,
}

impl StorageConfig {
    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join(&self.keystore_file)
    }

    pub fn connections_path(&self) -> PathBuf {
        self.data_dir.join(&self.connections_file)
    }

    pub fn active_chain_path(&self) -> PathBuf {
        self.data_dir.join(&self.active_chain_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            keystore_file: "keystore.json".to_string(),
            connections_file: "connections.json".to_string(),
            active_chain_file: "active_chain.json".to_string(),
        }
    }
}

/// Session lock policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity before the wallet locks itself, in seconds.
    pub auto_lock_secs: u64,

    /// How often the auto-lock monitor checks for inactivity, in seconds.
    pub check_interval_secs: u64,

    /// Consecutive wrong passwords before a lockout starts.
    pub max_failed_attempts: u32,

    /// Lockout length in seconds.
    pub lockout_secs: u64,
}

impl SessionConfig {
    pub fn auto_lock_after(&self) -> Duration {
        Duration::from_secs(self.auto_lock_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn lockout(&self) -> Duration {
        Duration::from_secs(self.lockout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_lock_secs: 15 * 60,
            check_interval_secs: 30,
            max_failed_attempts: 5,
            lockout_secs: 5 * 60,
        }
    }
}

/// Chain selection and RPC endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainsConfig {
    /// Active chain on first start (e.g., 1 for Ethereum mainnet).
    pub default_chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Per-chain endpoint overrides.
    pub overrides: Vec<ChainOverride>,
}

impl Default for ChainsConfig {
    fn default() -> Self {
        Self {
            default_chain_id: 1,
            rpc_timeout_secs: 10,
            overrides: Vec::new(),
        }
    }
}

/// Replaces the built-in RPC endpoint of one chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainOverride {
    pub chain_id: u64,

    /// Primary JSON-RPC endpoint URL.
    pub rpc_url: Option<String>,

    /// Failover JSON-RPC endpoint URLs.
    #[serde(default)]
    pub failover_urls: Vec<String>,
}

/// Fee preset and gas limit policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Safety margin added on top of the network gas estimate.
    pub gas_limit_margin_percent: u64,

    /// Gas limit used for native transfers when estimation fails.
    pub fallback_native_gas_limit: u64,

    /// Gas limit used for token transfers and contract calls when estimation fails.
    pub fallback_call_gas_limit: u64,

    /// Fee rate per tier as a percentage of the network gas price.
    pub slow_percent: u64,
    pub standard_percent: u64,
    pub fast_percent: u64,

    /// Expected confirmation time per tier, in seconds.
    pub slow_confirmation_secs: u64,
    pub standard_confirmation_secs: u64,
    pub fast_confirmation_secs: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            gas_limit_margin_percent: 20,
            fallback_native_gas_limit: 21_000,
            fallback_call_gas_limit: 100_000,
            slow_percent: 90,
            standard_percent: 100,
            fast_percent: 120,
            slow_confirmation_secs: 180,
            standard_confirmation_secs: 60,
            fast_confirmation_secs: 15,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Management API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// API key for authentication (Bearer token).
    pub api_key: String,
}

/// Placeholder key shipped in the defaults.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            api_key: PLACEHOLDER_API_KEY.to_string(),
        }
    }
}
