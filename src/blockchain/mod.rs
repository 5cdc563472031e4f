//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! broker / management API
//!     → transaction.rs (validate, estimate, sign after approval)
//!     → gateway.rs (ChainRpc seam, one client per chain)
//!     → client.rs (alloy HTTP providers with timeouts and failover)
//!
//! signing requests
//!     → wallet.rs (personal_sign, EIP-712)
//! ```
//!
//! # Security Constraints
//! - Keys come only from the encrypted key store, per operation
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod client;
pub mod gateway;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::BlockchainClient;
pub use gateway::{ChainRpc, RpcGateway};
pub use transaction::{
    FeeEstimate, FeePreset, FeeTier, PreparedTransaction, TransactionError, TransactionPreparer,
};
pub use types::{BlockchainError, BlockchainResult};
