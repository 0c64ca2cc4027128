//! Backend registry.
//!
//! # Data Flow
//! ```text
//! Incoming Request (Host header)
//!     → matcher.rs (normalize host)
//!     → exact lookup in the host table
//!     → Return: matched Cluster, default Cluster, or NoMatch
//!
//! Registry Compilation (at startup):
//!     ClusterConfig[]
//!     → Build host → cluster map
//!     → Freeze as immutable BackendRegistry
//! ```
//!
//! # Design Decisions
//! - Compiled at startup, immutable at runtime (thread-safe without locks)
//! - O(1) host lookup via HashMap
//! - Explicit NoMatch unless a default cluster is configured

pub mod cluster;
pub mod matcher;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Request;

use crate::config::ProxyConfig;

pub use cluster::Cluster;
pub use matcher::{normalize_host, request_host};

/// Static configuration of backend clusters.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    clusters: Vec<Arc<Cluster>>,
    by_host: HashMap<String, Arc<Cluster>>,
    default: Option<Arc<Cluster>>,
}

impl BackendRegistry {
    pub fn from_config(config: &ProxyConfig) -> Self {
        let clusters: Vec<Arc<Cluster>> = config
            .clusters
            .iter()
            .map(|c| Arc::new(Cluster::from_config(c)))
            .collect();

        let mut by_host = HashMap::new();
        for cluster in &clusters {
            for host in &cluster.hosts {
                by_host.entry(normalize_host(host)).or_insert_with(|| cluster.clone());
            }
        }

        let default = config
            .default_cluster
            .as_ref()
            .and_then(|name| clusters.iter().find(|c| &c.name == name).cloned());

        tracing::debug!(clusters = clusters.len(), hosts = by_host.len(), "Backend registry built");

        Self {
            clusters,
            by_host,
            default,
        }
    }

    /// Cluster for an already normalized host, falling back to the default.
    pub fn match_host(&self, host: &str) -> Option<Arc<Cluster>> {
        self.by_host
            .get(host)
            .or(self.default.as_ref())
            .cloned()
    }

    /// Cluster for a request, by its `Host` header.
    pub fn route<B>(&self, req: &Request<B>) -> Option<Arc<Cluster>> {
        match request_host(req) {
            Some(host) => self.match_host(&host),
            None => self.default.clone(),
        }
    }

    pub fn clusters(&self) -> &[Arc<Cluster>] {
        &self.clusters
    }

    pub fn get(&self, name: &str) -> Option<Arc<Cluster>> {
        self.clusters.iter().find(|c| c.name == name).cloned()
    }
}
