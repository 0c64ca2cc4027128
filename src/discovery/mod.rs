//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (poller.rs)
//!     → resolver.rs (SRV query per cluster)
//!     → filter by cluster port
//!     → directory.rs (publish new live-set snapshot)
//!     → identity.rs (is one of these targets this process?)
//!
//! Request path:
//!     selector reads directory snapshot (no locks)
//! ```
//!
//! # Design Decisions
//! - Live sets are replaced wholesale, never mutated in place
//! - DNS failures never reach an in-flight request

pub mod directory;
pub mod identity;
pub mod poller;
pub mod resolver;

pub use directory::{Directory, LiveSet};
pub use identity::LocalIdentity;
pub use poller::{DiscoveryLoop, DiscoveryState, RefreshOutcome};
pub use resolver::{DiscoveryError, HickoryResolver, SrvResolver, SrvTarget, StaticResolver};
