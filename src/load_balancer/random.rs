//! Uniform random load balancing strategy.

use crate::load_balancer::{LoadBalancer, target::UpstreamTarget};

/// Picks a target uniformly at random.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for Random {
    fn next_target(&self, targets: &[UpstreamTarget]) -> Option<UpstreamTarget> {
        if targets.is_empty() {
            return None;
        }
        Some(targets[fastrand::usize(..targets.len())].clone())
    }
}
