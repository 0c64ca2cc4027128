//! Self-identification among discovered instances.
//!
//! A proxy replica often runs next to (or inside) one of the instances it
//! discovers. Matching SRV targets against the local hostname and interface
//! addresses tells "pin points at this process" apart from "pin points at a
//! peer".

use std::net::IpAddr;

use crate::discovery::resolver::SrvResolver;
use crate::load_balancer::target::normalize_name;
use crate::load_balancer::UpstreamTarget;

/// What this machine calls itself.
#[derive(Debug, Clone, Default)]
pub struct LocalIdentity {
    hostname: Option<String>,
    addresses: Vec<IpAddr>,
}

impl LocalIdentity {
    pub fn new(hostname: Option<String>, addresses: Vec<IpAddr>) -> Self {
        Self {
            hostname: hostname.map(|h| normalize_name(&h)).filter(|h| !h.is_empty()),
            addresses,
        }
    }

    /// Gather hostname and interface addresses from the operating system.
    pub fn detect(hostname_override: Option<&str>) -> Self {
        let hostname = match hostname_override {
            Some(name) => Some(name.to_string()),
            None => match hostname::get() {
                Ok(name) => Some(name.to_string_lossy().into_owned()),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read local hostname");
                    None
                }
            },
        };

        let addresses = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces.into_iter().map(|i| i.ip()).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not enumerate local interfaces");
                Vec::new()
            }
        };

        let identity = Self::new(hostname, addresses);
        tracing::info!(
            hostname = ?identity.hostname,
            addresses = identity.addresses.len(),
            "Local identity detected"
        );
        identity
    }

    /// True when `target` names this host, either fully or by its first label.
    pub fn matches_name(&self, target: &str) -> bool {
        let Some(hostname) = &self.hostname else {
            return false;
        };
        let target = normalize_name(target);
        if &target == hostname {
            return true;
        }
        let short = |name: &str| name.split('.').next().map(str::to_string);
        // Only compare short names when one side is unqualified.
        (!hostname.contains('.') || !target.contains('.')) && short(&target) == short(hostname)
    }

    pub fn owns_address(&self, ip: &IpAddr) -> bool {
        self.addresses.contains(ip)
    }

    /// Find which of `targets`, if any, is this process. Name matches win;
    /// otherwise targets are resolved and compared against local addresses.
    pub async fn find_self(
        &self,
        targets: &[UpstreamTarget],
        resolver: &dyn SrvResolver,
    ) -> Option<UpstreamTarget> {
        if let Some(found) = targets.iter().find(|t| self.matches_name(&t.host)) {
            return Some(found.clone());
        }
        if self.addresses.is_empty() {
            return None;
        }
        for target in targets {
            match resolver.lookup_ip(&target.host).await {
                Ok(ips) if ips.iter().any(|ip| self.owns_address(ip)) => {
                    return Some(target.clone());
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(target = %target, error = %e, "Address lookup failed"),
            }
        }
        None
    }
}
