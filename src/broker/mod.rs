//! RPC broker subsystem.
//!
//! # Data Flow
//! ```text
//! page context ──dispatch──▶ dispatcher.rs ──▶ immediate result
//!                                 │
//!                                 ├──▶ ledger.rs (PendingRequest)
//!                                 └──▶ approval.rs (prompt: unlock or review)
//!
//! approval surface ──approve/reject──▶ dispatcher.rs
//!                                 ├──▶ blockchain (sign, broadcast)
//!                                 └──▶ contexts.rs (response to caller,
//!                                                   events to tabs)
//! ```
//!
//! # Design Decisions
//! - Params are normalized into typed commands before any other step
//! - One table (permissions.rs) decides what every method requires
//! - Input and authorization errors never create a ledger entry
//! - The broker never blocks a caller on the user's decision

pub mod approval;
pub mod command;
pub mod contexts;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod permissions;

pub use approval::{ApprovalChannel, ApprovalEvent, ApprovalOutcome, ApprovalStage, ApprovalSurface};
pub use contexts::{Attachment, ContextError, ContextHub, ContextMessage, ContextRef};
pub use dispatcher::{
    ApprovalError, ApprovalInput, Broker, BrokerParts, BrokerRequest, DispatchOutcome,
};
pub use error::ProviderError;
pub use ledger::{PendingAction, PendingRequest, PendingRequestLedger};
