//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use crate::load_balancer::{LoadBalancer, target::UpstreamTarget};

/// Round-robin selector.
/// Stores an internal counter to rotate through targets.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_target(&self, targets: &[UpstreamTarget]) -> Option<UpstreamTarget> {
        if targets.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % targets.len();
        Some(targets[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let a = UpstreamTarget::new("node-a", 5000);
        let b = UpstreamTarget::new("node-b", 5000);
        let targets = vec![a.clone(), b.clone()];

        assert_eq!(lb.next_target(&targets), Some(a.clone()));
        assert_eq!(lb.next_target(&targets), Some(b));
        assert_eq!(lb.next_target(&targets), Some(a));
        assert_eq!(lb.next_target(&[]), None);
    }
}
