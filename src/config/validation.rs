//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (default cluster exists)
//! - Validate value ranges (intervals > 0, ports valid)
//! - Detect hosts claimed by more than one cluster
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashMap;

use crate::config::schema::ProxyConfig;
use crate::session::cipher::decode_key;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    DuplicateCluster(String),
    EmptyHosts(String),
    HostConflict { host: String, first: String, second: String },
    InvalidPort(String),
    UnsupportedScheme { cluster: String, scheme: String },
    EmptyDiscoveryName(String),
    UnknownDefaultCluster(String),
    InvalidSessionKey { index: usize, reason: String },
    InvalidSameSite(String),
    ZeroInterval,
    ZeroCacheCapacity,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::DuplicateCluster(name) => write!(f, "duplicate cluster name '{}'", name),
            ValidationError::EmptyHosts(name) => write!(f, "cluster '{}' has no hosts", name),
            ValidationError::HostConflict { host, first, second } => write!(
                f,
                "host '{}' is claimed by both '{}' and '{}'",
                host, first, second
            ),
            ValidationError::InvalidPort(name) => write!(f, "cluster '{}' has port 0", name),
            ValidationError::UnsupportedScheme { cluster, scheme } => write!(
                f,
                "cluster '{}' uses unsupported scheme '{}'",
                cluster, scheme
            ),
            ValidationError::EmptyDiscoveryName(name) => {
                write!(f, "cluster '{}' has an empty discovery_name", name)
            }
            ValidationError::UnknownDefaultCluster(name) => {
                write!(f, "default_cluster '{}' does not exist", name)
            }
            ValidationError::InvalidSessionKey { index, reason } => {
                write!(f, "session key #{} is invalid: {}", index, reason)
            }
            ValidationError::InvalidSameSite(value) => {
                write!(f, "cookie_same_site '{}' must be Strict, Lax or None", value)
            }
            ValidationError::ZeroInterval => write!(f, "discovery.interval_secs must be > 0"),
            ValidationError::ZeroCacheCapacity => write!(f, "session.cache_capacity must be > 0"),
        }
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut names: HashMap<&str, ()> = HashMap::new();
    let mut host_owner: HashMap<String, &str> = HashMap::new();

    for cluster in &config.clusters {
        if names.insert(cluster.name.as_str(), ()).is_some() {
            errors.push(ValidationError::DuplicateCluster(cluster.name.clone()));
        }
        if cluster.hosts.is_empty() {
            errors.push(ValidationError::EmptyHosts(cluster.name.clone()));
        }
        for host in &cluster.hosts {
            let host = host.to_lowercase();
            match host_owner.get(&host) {
                Some(first) if *first != cluster.name.as_str() => {
                    errors.push(ValidationError::HostConflict {
                        host: host.clone(),
                        first: first.to_string(),
                        second: cluster.name.clone(),
                    });
                }
                _ => {
                    host_owner.insert(host, cluster.name.as_str());
                }
            }
        }
        if cluster.port == 0 {
            errors.push(ValidationError::InvalidPort(cluster.name.clone()));
        }
        if !cluster.scheme.eq_ignore_ascii_case("http") {
            errors.push(ValidationError::UnsupportedScheme {
                cluster: cluster.name.clone(),
                scheme: cluster.scheme.clone(),
            });
        }
        if cluster.discovery_name.trim().is_empty() {
            errors.push(ValidationError::EmptyDiscoveryName(cluster.name.clone()));
        }
    }

    if let Some(default) = &config.default_cluster {
        if !names.contains_key(default.as_str()) {
            errors.push(ValidationError::UnknownDefaultCluster(default.clone()));
        }
    }

    for (index, key) in config.session.keys.iter().enumerate() {
        if let Err(e) = decode_key(key) {
            errors.push(ValidationError::InvalidSessionKey {
                index,
                reason: e.to_string(),
            });
        }
    }

    if !matches!(
        config.session.cookie_same_site.to_ascii_lowercase().as_str(),
        "strict" | "lax" | "none"
    ) {
        errors.push(ValidationError::InvalidSameSite(
            config.session.cookie_same_site.clone(),
        ));
    }

    if config.discovery.interval_secs == 0 {
        errors.push(ValidationError::ZeroInterval);
    }
    if config.session.cache_capacity == 0 {
        errors.push(ValidationError::ZeroCacheCapacity);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ClusterConfig;

    fn cluster(name: &str, hosts: &[&str]) -> ClusterConfig {
        ClusterConfig {
            name: name.into(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            discovery_name: format!("_signalr._tcp.{}.internal", name),
            port: 5000,
            scheme: "http".into(),
            local_address: None,
            strategy: Default::default(),
        }
    }

    #[test]
    fn accepts_default_config() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = ProxyConfig::default();
        config.clusters.push(cluster("chat", &["chat.example.com"]));
        config.clusters.push(cluster("chat", &["CHAT.example.com"]));
        config.default_cluster = Some("missing".into());
        config.session.keys.push("not base64 !!".into());
        config.discovery.interval_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateCluster("chat".into())));
        assert!(errors.contains(&ValidationError::UnknownDefaultCluster("missing".into())));
        assert!(errors.contains(&ValidationError::ZeroInterval));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidSessionKey { index: 0, .. })));
    }

    #[test]
    fn detects_host_claimed_twice() {
        let mut config = ProxyConfig::default();
        config.clusters.push(cluster("chat", &["chat.example.com"]));
        config.clusters.push(cluster("game", &["Chat.Example.com"]));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::HostConflict {
                host: "chat.example.com".into(),
                first: "chat".into(),
                second: "game".into(),
            }]
        );
    }

    #[test]
    fn rejects_tls_upstreams() {
        let mut config = ProxyConfig::default();
        let mut c = cluster("chat", &["chat.example.com"]);
        c.scheme = "https".into();
        config.clusters.push(c);

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::UnsupportedScheme { .. }));
    }
}
