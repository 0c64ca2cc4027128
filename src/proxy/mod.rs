//! Sticky-session proxy core.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → router.rs (host → cluster, session, pin validation)
//!     → websocket.rs (handshake detection)
//!     → transform.rs (forwarding headers)
//!     → forwarder.rs (hyper client, upgrade hand-off)
//!     → outcome.rs (classify for logs and metrics)
//!     → router.rs (debug header, cookie persist)
//! ```

pub mod forwarder;
pub mod outcome;
pub mod router;
pub mod transform;
pub mod websocket;

pub use forwarder::{ForwardContext, Forwarded, Forwarder, HyperForwarder, PendingUpgrade};
pub use outcome::Outcome;
pub use router::{ProxyRouter, X_UPSTREAM_HOST};
pub use transform::{ForwardingHeaders, Transform};
