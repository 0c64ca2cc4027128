//! DNS resolution capability.
//!
//! # Responsibilities
//! - Query SRV records enumerating backend instances
//! - Resolve instance names to addresses (self-identification)
//!
//! # Design Decisions
//! - Every query carries its own deadline; a hung resolver never stalls
//!   the discovery loop past one timeout
//! - An empty answer is an error, so callers treat it like a failed query

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use thiserror::Error;

use crate::config::{DiscoveryConfig, StaticSrvRecord};
use crate::load_balancer::target::normalize_name;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("DNS query for {name} failed: {message}")]
    Query { name: String, message: String },

    #[error("DNS query for {0} returned no records")]
    Empty(String),

    #[error("DNS query for {0} timed out")]
    Timeout(String),
}

/// One SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

#[async_trait]
pub trait SrvResolver: Send + Sync {
    async fn query_srv(&self, name: &str) -> Result<Vec<SrvTarget>, DiscoveryError>;

    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DiscoveryError>;
}

/// Resolver backed by hickory and the system DNS configuration.
pub struct HickoryResolver {
    resolver: TokioResolver,
    timeout: Duration,
}

impl HickoryResolver {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 2;

        let builder = match Resolver::builder_tokio() {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read system DNS configuration, using defaults");
                Resolver::builder_with_config(ResolverConfig::default(), TokioConnectionProvider::default())
            }
        };
        let resolver = builder.with_options(opts).build();

        Self { resolver, timeout }
    }
}

#[async_trait]
impl SrvResolver for HickoryResolver {
    async fn query_srv(&self, name: &str) -> Result<Vec<SrvTarget>, DiscoveryError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.srv_lookup(name))
            .await
            .map_err(|_| DiscoveryError::Timeout(name.to_string()))?
            .map_err(|e| DiscoveryError::Query {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let targets: Vec<SrvTarget> = lookup
            .iter()
            .map(|srv| SrvTarget {
                target: normalize_name(&srv.target().to_utf8()),
                port: srv.port(),
                priority: srv.priority(),
                weight: srv.weight(),
            })
            .collect();

        if targets.is_empty() {
            return Err(DiscoveryError::Empty(name.to_string()));
        }
        Ok(targets)
    }

    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.lookup_ip(host))
            .await
            .map_err(|_| DiscoveryError::Timeout(host.to_string()))?
            .map_err(|e| DiscoveryError::Query {
                name: host.to_string(),
                message: e.to_string(),
            })?;
        Ok(lookup.iter().collect())
    }
}

/// Resolver answering from a fixed, replaceable table.
///
/// Used for local development without SRV records and by tests, which
/// swap answers at runtime to simulate instances joining and leaving.
#[derive(Default)]
pub struct StaticResolver {
    records: RwLock<HashMap<String, Vec<StaticSrvRecord>>>,
}

impl StaticResolver {
    pub fn new(records: HashMap<String, Vec<StaticSrvRecord>>) -> Self {
        let records = records
            .into_iter()
            .map(|(name, r)| (normalize_name(&name), r))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Replace the answer for `name`. An empty list makes queries fail.
    pub fn set(&self, name: &str, records: Vec<StaticSrvRecord>) {
        let mut table = self.records.write().unwrap_or_else(|e| e.into_inner());
        table.insert(normalize_name(name), records);
    }

    pub fn remove(&self, name: &str) {
        let mut table = self.records.write().unwrap_or_else(|e| e.into_inner());
        table.remove(&normalize_name(name));
    }
}

#[async_trait]
impl SrvResolver for StaticResolver {
    async fn query_srv(&self, name: &str) -> Result<Vec<SrvTarget>, DiscoveryError> {
        let table = self.records.read().unwrap_or_else(|e| e.into_inner());
        let records = table.get(&normalize_name(name)).ok_or_else(|| DiscoveryError::Query {
            name: name.to_string(),
            message: "NXDOMAIN".to_string(),
        })?;
        if records.is_empty() {
            return Err(DiscoveryError::Empty(name.to_string()));
        }
        Ok(records
            .iter()
            .map(|r| SrvTarget {
                target: normalize_name(&r.target),
                port: r.port,
                priority: r.priority,
                weight: r.weight,
            })
            .collect())
    }

    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, DiscoveryError> {
        let host = normalize_name(host);
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        let table = self.records.read().unwrap_or_else(|e| e.into_inner());
        let addresses: Vec<IpAddr> = table
            .values()
            .flatten()
            .filter(|r| normalize_name(&r.target) == host)
            .flat_map(|r| r.addresses.iter().filter_map(|a| a.parse().ok()))
            .collect();
        if addresses.is_empty() {
            return Err(DiscoveryError::Empty(host));
        }
        Ok(addresses)
    }
}

/// Build the resolver selected in configuration.
pub fn from_config(config: &DiscoveryConfig) -> Box<dyn SrvResolver> {
    match config.resolver {
        crate::config::ResolverKind::System => {
            Box::new(HickoryResolver::new(Duration::from_secs(config.query_timeout_secs.max(1))))
        }
        crate::config::ResolverKind::Static => {
            Box::new(StaticResolver::new(config.static_records.clone()))
        }
    }
}
