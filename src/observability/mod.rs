//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Router, discovery loop, session store
//!     → logging.rs (tracing events keyed by cluster / upstream / session_id)
//!     → metrics.rs (connection counters, discovery and session outcomes)
//!
//! Consumers:
//!     → stdout, pretty or JSON
//!     → Prometheus scrape endpoint
//!     → admin API (ConnectionSnapshot)
//! ```
//!
//! # Design Decisions
//! - Connection counters live in process as well, so the admin API and
//!   tests can read them without a recorder installed

pub mod logging;
pub mod metrics;

pub use metrics::{ConnectionMetrics, ConnectionSnapshot};
