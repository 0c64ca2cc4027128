//! Backend cluster definition.

use crate::config::ClusterConfig;
use crate::load_balancer::{self, LoadBalancer, UpstreamTarget};

/// A pool of interchangeable backend instances discovered through one SRV name.
#[derive(Debug)]
pub struct Cluster {
    pub name: String,
    pub hosts: Vec<String>,
    pub discovery_name: String,
    pub port: u16,
    pub scheme: String,
    /// Where to send traffic pinned to this process itself.
    pub local_address: Option<String>,
    balancer: Box<dyn LoadBalancer>,
}

impl Cluster {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            name: config.name.clone(),
            hosts: config.hosts.iter().map(|h| h.to_lowercase()).collect(),
            discovery_name: config.discovery_name.clone(),
            port: config.port,
            scheme: config.scheme.to_lowercase(),
            local_address: config.local_address.clone(),
            balancer: load_balancer::strategy(config.strategy),
        }
    }

    pub fn balancer(&self) -> &dyn LoadBalancer {
        self.balancer.as_ref()
    }

    /// Base URI for a request to `target`, honouring the self loopback.
    pub fn base_uri(&self, target: &UpstreamTarget, is_self: bool) -> String {
        match (&self.local_address, is_self) {
            (Some(local), true) => format!("{}://{}", self.scheme, local),
            _ => format!("{}://{}", self.scheme, target.authority()),
        }
    }
}
