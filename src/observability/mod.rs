//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, never secrets)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stderr (pretty or JSON lines)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request IDs come from the HTTP layer and ride on the request span
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
