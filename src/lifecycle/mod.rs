//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Open stores → Build services → Start tasks
//!     → Bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop auto-lock monitor → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then stores, then services, listener last
//! - Session and pending requests are never persisted; every start is locked
//!   with an empty ledger

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{Services, StartupError};
