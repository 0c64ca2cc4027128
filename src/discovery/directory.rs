//! Shared directory of live upstream instances.
//!
//! # Responsibilities
//! - Hold the live set of every cluster as an immutable snapshot
//! - Publish new sets wholesale so readers never see a partial update
//! - Hold this process's own identity in each cluster once discovered
//!
//! # Design Decisions
//! - Single writer (the discovery loop), many lock-free readers
//! - Self identity is per cluster: one host may serve several clusters on
//!   different ports

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::load_balancer::UpstreamTarget;

/// The resolved instances of one cluster at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSet {
    pub targets: Vec<UpstreamTarget>,
    pub refreshed_at: SystemTime,
}

impl LiveSet {
    pub fn new(mut targets: Vec<UpstreamTarget>) -> Self {
        targets.sort();
        targets.dedup();
        Self {
            targets,
            refreshed_at: SystemTime::now(),
        }
    }

    pub fn contains(&self, target: &UpstreamTarget) -> bool {
        self.targets.contains(target)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }
}

/// Process-wide view of discovered instances.
#[derive(Debug, Default)]
pub struct Directory {
    sets: ArcSwap<HashMap<String, Arc<LiveSet>>>,
    self_identities: ArcSwap<HashMap<String, UpstreamTarget>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a cluster's live set.
    pub fn live_set(&self, cluster: &str) -> Option<Arc<LiveSet>> {
        self.sets.load().get(cluster).cloned()
    }

    /// Snapshot of every cluster's live set.
    pub fn all(&self) -> Arc<HashMap<String, Arc<LiveSet>>> {
        self.sets.load_full()
    }

    /// Replace a cluster's live set.
    pub fn publish(&self, cluster: &str, set: LiveSet) {
        let set = Arc::new(set);
        self.sets.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(cluster.to_string(), set.clone());
            next
        });
    }

    /// This process's instance in `cluster`, if discovered.
    pub fn self_identity(&self, cluster: &str) -> Option<UpstreamTarget> {
        self.self_identities.load().get(cluster).cloned()
    }

    /// Snapshot of this process's instance per cluster.
    pub fn self_identities(&self) -> Arc<HashMap<String, UpstreamTarget>> {
        self.self_identities.load_full()
    }

    /// Record this process's identity in `cluster`. Returns true when it changed.
    pub fn set_self_identity(&self, cluster: &str, identity: Option<UpstreamTarget>) -> bool {
        if self.self_identities.load().get(cluster) == identity.as_ref() {
            return false;
        }
        self.self_identities.rcu(|current| {
            let mut next = HashMap::clone(current);
            match &identity {
                Some(me) => next.insert(cluster.to_string(), me.clone()),
                None => next.remove(cluster),
            };
            next
        });
        true
    }

    pub fn is_self(&self, cluster: &str, target: &UpstreamTarget) -> bool {
        self.self_identities
            .load()
            .get(cluster)
            .is_some_and(|me| me == target)
    }
}
