//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + BRIDGE_ADMIN_API_KEY
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → handed to lifecycle::startup, which builds every subsystem
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::AdminConfig;
pub use schema::BridgeConfig;
pub use schema::ChainOverride;
pub use schema::ChainsConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::SessionConfig;
pub use schema::StorageConfig;
pub use schema::TransactionConfig;
