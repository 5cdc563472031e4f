//! Session lock subsystem.
//!
//! # Responsibilities
//! - Track whether decrypted-key operations are currently allowed
//! - Count failed unlocks and enforce a lockout window
//! - Auto-lock after inactivity (monitor.rs)
//!
//! # Design Decisions
//! - Signing paths check the lock and fail; they never prompt for unlock
//!   themselves. Routing to an unlock prompt is the broker's job
//! - Unlock verifies by decrypting a stored key, never by a weaker check

pub mod lock;
pub mod monitor;

pub use lock::{SessionLockManager, SessionStatus};
pub use monitor::AutoLockMonitor;

use thiserror::Error;

use crate::vault::KeyStoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("wallet is locked")]
    Locked,

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("too many failed attempts, try again in {remaining_secs}s")]
    LockedOut { remaining_secs: u64 },

    #[error("no keys in the wallet")]
    NoKeys,

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
}
