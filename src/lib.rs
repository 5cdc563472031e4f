//! DApp provider bridge library.
//!
//! The daemon in `main.rs` wires these subsystems together through
//! [`lifecycle::startup`]; integration tests build them the same way.

// Durable state and secrets
pub mod storage;
pub mod vault;

// Wallet state
pub mod chains;
pub mod connections;
pub mod session;

// Request handling
pub mod blockchain;
pub mod broker;

// Surfaces
pub mod admin;
pub mod http;

// Cross-cutting
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use broker::Broker;
pub use config::BridgeConfig;
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
