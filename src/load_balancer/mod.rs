//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Cluster matched → session resolved
//!     → selector.rs (reuse a still-live pin, or pick a new target)
//!     → Apply load balancing algorithm over the live set:
//!         - round_robin.rs (rotate through targets)
//!         - random.rs (uniform pick)
//!     → Return target or NoUpstream
//! ```
//!
//! # Design Decisions
//! - Once pinned, a session stays on its target until it leaves discovery
//! - Algorithm selection per cluster
//! - Selection reads an immutable live-set snapshot, never a lock

pub mod random;
pub mod round_robin;
pub mod selector;
pub mod target;

use std::fmt::Debug;

use crate::config::SelectionStrategy;

pub use selector::{Selection, UpstreamSelector};
pub use target::UpstreamTarget;

/// Strategy for choosing among live targets.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick one of `targets`, or `None` when the slice is empty.
    fn next_target(&self, targets: &[UpstreamTarget]) -> Option<UpstreamTarget>;
}

/// Instantiate the configured strategy.
pub fn strategy(kind: SelectionStrategy) -> Box<dyn LoadBalancer> {
    match kind {
        SelectionStrategy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        SelectionStrategy::Random => Box::new(random::Random::new()),
    }
}
