//! Upstream selection with session affinity.
//!
//! # Responsibilities
//! - Keep a session on its pinned target while that target is live
//! - Pick a fresh target from the live set otherwise
//! - Surface an empty live set as [`ProxyError::NoUpstream`]
//!
//! # Design Decisions
//! - Pins are checked against the discovery snapshot by default, so a DNS
//!   hiccup cannot break affinity on the request path
//! - Strict validation re-queries SRV per pinned request and falls back to
//!   the snapshot when that query fails

use std::sync::Arc;

use crate::discovery::{Directory, SrvResolver};
use crate::error::ProxyError;
use crate::load_balancer::target::{normalize_name, UpstreamTarget};
use crate::registry::Cluster;

/// The outcome of [`UpstreamSelector::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub target: UpstreamTarget,
    /// The session's existing pin was honoured.
    pub reused_pin: bool,
}

pub struct UpstreamSelector {
    directory: Arc<Directory>,
    strict: Option<Arc<dyn SrvResolver>>,
}

impl UpstreamSelector {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self {
            directory,
            strict: None,
        }
    }

    /// Validate pins with a point-in-time SRV lookup.
    pub fn with_strict_validation(mut self, resolver: Arc<dyn SrvResolver>) -> Self {
        self.strict = Some(resolver);
        self
    }

    /// Choose the target for a request. `pinned` is the session's stored
    /// `host:port`, if any.
    pub async fn select(&self, cluster: &Cluster, pinned: Option<&str>) -> Result<Selection, ProxyError> {
        if let Some(pin) = pinned.filter(|p| !p.is_empty()) {
            if let Some(target) = self.validate_pin(cluster, pin).await {
                return Ok(Selection {
                    target,
                    reused_pin: true,
                });
            }
            tracing::info!(cluster = %cluster.name, pinned = %pin, "Pinned upstream is no longer live");
        }

        let live = self
            .directory
            .live_set(&cluster.name)
            .filter(|set| !set.is_empty())
            .ok_or_else(|| ProxyError::NoUpstream(cluster.name.clone()))?;

        let target = cluster
            .balancer()
            .next_target(&live.targets)
            .ok_or_else(|| ProxyError::NoUpstream(cluster.name.clone()))?;

        Ok(Selection {
            target,
            reused_pin: false,
        })
    }

    /// Return the pinned target when it is still a live member of `cluster`.
    pub async fn validate_pin(&self, cluster: &Cluster, pinned: &str) -> Option<UpstreamTarget> {
        let target = UpstreamTarget::parse(pinned)?;
        if target.port != cluster.port {
            return None;
        }

        if let Some(resolver) = &self.strict {
            match resolver.query_srv(&cluster.discovery_name).await {
                Ok(answer) => {
                    let live = answer
                        .iter()
                        .any(|srv| srv.port == target.port && normalize_name(&srv.target) == target.host);
                    return live.then_some(target);
                }
                Err(e) => {
                    tracing::warn!(
                        cluster = %cluster.name,
                        error = %e,
                        "Pin validation lookup failed, using discovery snapshot"
                    );
                }
            }
        }

        let live = self.directory.live_set(&cluster.name)?;
        live.contains(&target).then_some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, StaticSrvRecord};
    use crate::discovery::{LiveSet, StaticResolver};

    const NAME: &str = "_signalr._tcp.chat.internal";

    fn cluster() -> Cluster {
        Cluster::from_config(&ClusterConfig {
            name: "chat".into(),
            hosts: vec!["chat.example.com".into()],
            discovery_name: NAME.into(),
            port: 5000,
            scheme: "http".into(),
            local_address: None,
            strategy: Default::default(),
        })
    }

    fn publish(directory: &Directory, hosts: &[&str]) {
        directory.publish(
            "chat",
            LiveSet::new(hosts.iter().map(|h| UpstreamTarget::new(h, 5000)).collect()),
        );
    }

    #[tokio::test]
    async fn pinned_target_is_stable() {
        let directory = Arc::new(Directory::new());
        publish(&directory, &["a.internal", "b.internal", "c.internal"]);
        let selector = UpstreamSelector::new(directory);
        let cluster = cluster();

        for _ in 0..50 {
            let selection = selector.select(&cluster, Some("b.internal:5000")).await.unwrap();
            assert_eq!(selection.target, UpstreamTarget::new("b.internal", 5000));
            assert!(selection.reused_pin);
        }
    }

    #[tokio::test]
    async fn dropped_pin_moves_to_live_target() {
        let directory = Arc::new(Directory::new());
        publish(&directory, &["a.internal", "b.internal"]);
        let selector = UpstreamSelector::new(directory.clone());
        let cluster = cluster();

        publish(&directory, &["b.internal"]);
        let selection = selector.select(&cluster, Some("a.internal:5000")).await.unwrap();
        assert_eq!(selection.target.host, "b.internal");
        assert!(!selection.reused_pin);
    }

    #[tokio::test]
    async fn pin_on_wrong_port_is_rejected() {
        let directory = Arc::new(Directory::new());
        publish(&directory, &["a.internal"]);
        let selector = UpstreamSelector::new(directory);

        assert!(selector.validate_pin(&cluster(), "a.internal:6000").await.is_none());
        assert!(selector.validate_pin(&cluster(), "garbage").await.is_none());
    }

    #[tokio::test]
    async fn empty_live_set_is_no_upstream() {
        let directory = Arc::new(Directory::new());
        let selector = UpstreamSelector::new(directory.clone());
        let cluster = cluster();

        let err = selector.select(&cluster, None).await.unwrap_err();
        assert!(matches!(err, ProxyError::NoUpstream(ref c) if c == "chat"));

        publish(&directory, &[]);
        let err = selector.select(&cluster, Some("a.internal:5000")).await.unwrap_err();
        assert!(matches!(err, ProxyError::NoUpstream(_)));
    }

    #[tokio::test]
    async fn strict_validation_consults_dns() {
        let directory = Arc::new(Directory::new());
        publish(&directory, &["a.internal", "b.internal"]);
        let resolver = Arc::new(StaticResolver::default());
        let selector = UpstreamSelector::new(directory).with_strict_validation(resolver.clone());
        let cluster = cluster();

        resolver.set(
            NAME,
            vec![StaticSrvRecord {
                target: "B.internal.".into(),
                port: 5000,
                priority: 0,
                weight: 0,
                addresses: vec![],
            }],
        );
        // Still in the snapshot, but DNS says it is gone.
        assert!(selector.validate_pin(&cluster, "a.internal:5000").await.is_none());
        assert!(selector.validate_pin(&cluster, "b.internal:5000").await.is_some());

        // Lookup failure falls back to the snapshot.
        resolver.remove(NAME);
        assert!(selector.validate_pin(&cluster, "a.internal:5000").await.is_some());
    }
}
