//! Connection subsystem.
//!
//! # Data Flow
//! ```text
//! page origin / URL
//!     → origin.rs (scheme + host + port)
//!     → registry.rs (lookup, account resolution)
//!
//! connect / permission approval
//!     → registry.rs upsert → StateStore::save → visible to lookups
//! ```

pub mod origin;
pub mod registry;
pub mod types;

pub use origin::normalize_origin;
pub use registry::{ConnectionRegistry, ConnectionsSnapshot};
pub use types::{Capability, Connection};

use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by connection lookups and updates.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid origin '{0}'")]
    InvalidOrigin(String),

    #[error("origin {0} is not connected")]
    NotConnected(String),

    #[error("account {0} is not authorized for this origin")]
    AccountNotAuthorized(String),

    #[error("no accounts are authorized for this origin")]
    NoAccounts,

    #[error(transparent)]
    Storage(#[from] StorageError),
}
