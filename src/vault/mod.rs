//! Key vault subsystem.
//!
//! # Data Flow
//! ```text
//! import / generate (password)
//!     → cipher.rs (PBKDF2-SHA256 → AES-256-GCM, fresh salt + IV)
//!     → store.rs ({address → EncryptedKeyData}, persisted)
//!
//! unlock / approve (password)
//!     → store.rs lookup → cipher.rs decrypt (tag check)
//!     → PrivateKeySigner, dropped after the signing call
//! ```
//!
//! # Security Constraints
//! - Wrong password and corrupted records are reported identically
//! - Plaintext keys live in zeroizing buffers only
//! - Nothing in this module logs secret material

pub mod cipher;
pub mod store;

pub use cipher::{EncryptedKeyData, VaultError};
pub use store::{KeyStore, KeyStoreError, KeyStoreSnapshot};
