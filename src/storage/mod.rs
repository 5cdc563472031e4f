//! Durable state persistence.
//!
//! # Data Flow
//! ```text
//! KeyStore / ConnectionRegistry / ActiveChain
//!     → StateStore::save (on every mutation)
//!     → json_file.rs (serde_json, temp file + rename)
//!
//! Startup:
//!     StateStore::load → Option<T> → subsystem rebuilds its in-memory view
//! ```
//!
//! # Design Decisions
//! - Each subsystem owns exactly one store, injected at construction
//! - Stores hold whole snapshots; there are no partial writes
//! - `MemoryStore` backs tests and process-local state

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use thiserror::Error;

/// Errors raised by a state store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A durable home for one snapshot of type `T`.
pub trait StateStore<T>: Send + Sync {
    /// Load the last saved snapshot, `None` if nothing was ever saved.
    fn load(&self) -> Result<Option<T>, StorageError>;

    /// Replace the stored snapshot.
    fn save(&self, value: &T) -> Result<(), StorageError>;
}
