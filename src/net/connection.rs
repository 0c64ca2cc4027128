//! Active-connection tracking.
//!
//! # Responsibilities
//! - Assign every forwarded call a unique connection ID for tracing
//! - Keep the set of in-flight forwards for the admin API
//! - Remove entries unconditionally when the forward ends
//! - Let shutdown wait for the set to drain
//!
//! # Design Decisions
//! - Removal happens in `Drop`, so early returns and panics cannot leak entries
//! - The set is a `DashMap`; no lock is held across an await point

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::load_balancer::UpstreamTarget;

/// Unique identifier for a forwarded connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Lifecycle of one tracked forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Plain request waiting on the upstream response.
    Forwarding,
    /// Upgraded connection relaying bytes.
    Tunnel,
}

/// What the admin API shows about one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub cluster: String,
    pub upstream: UpstreamTarget,
    pub session_id: String,
    pub state: ConnectionState,
    pub started_at: SystemTime,
}

/// Concurrency-safe set of in-flight forwards.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<DashMap<ConnectionId, ConnectionInfo>>,
    idle: Arc<Notify>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new forward. Returns a guard that removes it on drop.
    pub fn track(&self, cluster: &str, upstream: &UpstreamTarget, session_id: &str) -> ConnectionGuard {
        let id = ConnectionId::new();
        self.active.insert(
            id,
            ConnectionInfo {
                id,
                cluster: cluster.to_string(),
                upstream: upstream.clone(),
                session_id: session_id.to_string(),
                state: ConnectionState::Forwarding,
                started_at: SystemTime::now(),
            },
        );
        tracing::trace!(connection_id = %id, cluster, upstream = %upstream, "Connection tracked");
        ConnectionGuard {
            tracker: self.clone(),
            id,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.active.contains_key(&id)
    }

    /// Snapshot of every tracked connection, oldest first.
    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<ConnectionInfo> = self.active.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|c| c.started_at);
        all
    }

    /// Wait until the set is empty or `limit` passes. Returns whether it drained.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.idle.notified();
                if self.active.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(limit, drained).await.is_ok()
    }

    fn set_state(&self, id: ConnectionId, state: ConnectionState) {
        if let Some(mut entry) = self.active.get_mut(&id) {
            entry.state = state;
        }
    }

    fn remove(&self, id: ConnectionId) {
        self.active.remove(&id);
        if self.active.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// Guard that tracks a connection's lifetime.
/// Removes the entry from the active set when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Mark the connection as an upgraded tunnel.
    pub fn upgraded(&self) {
        self.tracker.set_state(self.id, ConnectionState::Tunnel);
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.remove(self.id);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> UpstreamTarget {
        UpstreamTarget::new("node-a.internal", 5000)
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert_eq!(id1.to_string().len(), 32);
    }

    #[test]
    fn tracker_adds_and_removes() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track("chat", &target(), "s1");
        let guard2 = tracker.track("chat", &target(), "s2");
        assert_eq!(tracker.active_count(), 2);
        assert!(tracker.contains(guard1.id()));

        guard2.upgraded();
        let states: Vec<_> = tracker.list().into_iter().map(|c| c.state).collect();
        assert!(states.contains(&ConnectionState::Tunnel));

        let id = guard1.id();
        drop(guard1);
        assert!(!tracker.contains(id));
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_after_last_guard() {
        let tracker = ConnectionTracker::new();
        assert!(tracker.wait_idle(Duration::from_millis(10)).await);

        let guard = tracker.track("chat", &target(), "s1");
        assert!(!tracker.wait_idle(Duration::from_millis(20)).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        assert!(tracker.wait_idle(Duration::from_secs(1)).await);
    }
}
