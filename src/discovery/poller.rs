//! Periodic service discovery.
//!
//! # Responsibilities
//! - Re-resolve every cluster's SRV name on a fixed period
//! - Publish the port-filtered answer as the cluster's live set
//! - Keep the previous live set when a query fails or comes back empty
//! - Detect which discovered instance is this process
//!
//! # States
//! ```text
//! Idle ──first tick──▶ Polling ──shutdown──▶ (exit)
//! ```
//!
//! # Design Decisions
//! - Fail open: stale data is preferred over an empty live set
//! - Shutdown is observed between ticks; an in-flight query finishes or
//!   times out on its own
//! - No backoff beyond the fixed period

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::discovery::directory::{Directory, LiveSet};
use crate::discovery::identity::LocalIdentity;
use crate::discovery::resolver::{DiscoveryError, SrvResolver};
use crate::load_balancer::UpstreamTarget;
use crate::observability::metrics;
use crate::registry::{BackendRegistry, Cluster};

/// Lifecycle of the discovery loop.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle = 0,
    Polling = 1,
}

impl From<u8> for DiscoveryState {
    fn from(val: u8) -> Self {
        match val {
            1 => DiscoveryState::Polling,
            _ => DiscoveryState::Idle,
        }
    }
}

/// Outcome of refreshing one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated(usize),
    Retained(DiscoveryError),
}

pub struct DiscoveryLoop {
    registry: Arc<BackendRegistry>,
    resolver: Arc<dyn SrvResolver>,
    directory: Arc<Directory>,
    identity: LocalIdentity,
    interval: Duration,
    state: AtomicU8,
}

impl DiscoveryLoop {
    pub fn new(
        registry: Arc<BackendRegistry>,
        resolver: Arc<dyn SrvResolver>,
        directory: Arc<Directory>,
        identity: LocalIdentity,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            resolver,
            directory,
            identity,
            interval,
            state: AtomicU8::new(DiscoveryState::Idle as u8),
        }
    }

    pub fn state(&self) -> DiscoveryState {
        DiscoveryState::from(self.state.load(Ordering::Relaxed))
    }

    /// Poll until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            clusters = self.registry.clusters().len(),
            "Service discovery starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.state.store(DiscoveryState::Polling as u8, Ordering::Relaxed);
                    self.refresh_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Service discovery received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Refresh every cluster once, then re-detect self-identity.
    pub async fn refresh_all(&self) {
        for cluster in self.registry.clusters() {
            self.refresh_cluster(cluster).await;
        }
        self.refresh_identity().await;
    }

    pub async fn refresh_cluster(&self, cluster: &Cluster) -> RefreshOutcome {
        let answer = match self.resolver.query_srv(&cluster.discovery_name).await {
            Ok(answer) => answer,
            Err(e) => return self.retain(cluster, e),
        };

        let targets: Vec<UpstreamTarget> = answer
            .iter()
            .filter(|srv| srv.port == cluster.port)
            .map(|srv| UpstreamTarget::new(&srv.target, srv.port))
            .collect();

        if targets.is_empty() {
            return self.retain(cluster, DiscoveryError::Empty(cluster.discovery_name.clone()));
        }

        let set = LiveSet::new(targets);
        let count = set.len();
        let changed = self
            .directory
            .live_set(&cluster.name)
            .map_or(true, |previous| previous.targets != set.targets);
        if changed {
            tracing::info!(cluster = %cluster.name, targets = ?set.targets, "Live set changed");
        }

        self.directory.publish(&cluster.name, set);
        metrics::record_discovery(&cluster.name, "updated");
        metrics::record_live_hosts(&cluster.name, count);
        RefreshOutcome::Updated(count)
    }

    fn retain(&self, cluster: &Cluster, error: DiscoveryError) -> RefreshOutcome {
        let kept = self.directory.live_set(&cluster.name).map_or(0, |s| s.len());
        tracing::warn!(
            cluster = %cluster.name,
            name = %cluster.discovery_name,
            error = %error,
            kept_targets = kept,
            "Discovery failed, keeping previous live set"
        );
        metrics::record_discovery(&cluster.name, "retained");
        RefreshOutcome::Retained(error)
    }

    /// Match this process against each cluster's live set, in registry order.
    async fn refresh_identity(&self) {
        for cluster in self.registry.clusters() {
            let Some(set) = self.directory.live_set(&cluster.name) else {
                continue;
            };
            let found = self.identity.find_self(&set.targets, self.resolver.as_ref()).await;
            // Losing the match on a failed lookup should not forget who we are.
            if found.is_none() && self.directory.self_identity(&cluster.name).is_some() {
                continue;
            }
            let identity = found.clone();
            if self.directory.set_self_identity(&cluster.name, found) {
                tracing::info!(cluster = %cluster.name, identity = ?identity, "Self identity updated");
            }
        }
    }
}
