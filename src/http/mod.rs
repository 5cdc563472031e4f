//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing, limits)
//!     → rpc.rs      POST /rpc   one provider call per request
//!     → websocket.rs GET /ws    long-lived page context channel
//!     → admin       /approvals, /session, /connections, ... (bearer auth)
//! ```
//!
//! # Design Decisions
//! - The `Origin` header, when a browser sends one, wins over any origin in
//!   the body
//! - Provider errors travel in the body with HTTP 200 on the page side, and
//!   as status codes on the management side

pub mod error;
pub mod rpc;
pub mod server;
pub mod websocket;

pub use error::ApiError;
pub use server::{AppState, HttpServer};
