//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the sticky-session proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Backend clusters, each selected by the inbound `Host` header.
    pub clusters: Vec<ClusterConfig>,

    /// Cluster receiving requests whose host matches no cluster.
    pub default_cluster: Option<String>,

    /// Service discovery settings.
    pub discovery: DiscoveryConfig,

    /// Session affinity settings.
    pub session: SessionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// A pool of interchangeable backend instances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Cluster identifier for logging/metrics and cookie naming.
    pub name: String,

    /// Inbound `Host` header values routed to this cluster (exact match).
    pub hosts: Vec<String>,

    /// DNS name queried for SRV records (e.g., "_signalr._tcp.chat.internal").
    pub discovery_name: String,

    /// Port the backend instances listen on. SRV answers on other ports are ignored.
    pub port: u16,

    /// Forwarding scheme.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Loopback address used when the chosen instance is this process itself.
    #[serde(default)]
    pub local_address: Option<String>,

    /// How unpinned sessions pick an instance.
    #[serde(default)]
    pub strategy: SelectionStrategy,
}

/// Selection algorithm for sessions without a valid pin.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    Random,
}

fn default_scheme() -> String {
    "http".to_string()
}

/// Which DNS resolver the discovery loop talks to.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// System resolver configuration (`/etc/resolv.conf`).
    #[default]
    System,
    /// Fixed answers from `static_records`.
    Static,
}

/// A fixed SRV answer, used by the static resolver.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StaticSrvRecord {
    pub target: String,
    pub port: u16,
    #[serde(default)]
    pub priority: u16,
    #[serde(default)]
    pub weight: u16,
    /// Addresses the target resolves to (optional, used for self-identity).
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// Service discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Seconds between SRV refreshes.
    pub interval_secs: u64,

    /// Per-query timeout in seconds.
    pub query_timeout_secs: u64,

    pub resolver: ResolverKind,

    /// SRV answers keyed by discovery name, for `resolver = "static"`.
    pub static_records: HashMap<String, Vec<StaticSrvRecord>>,

    /// Re-query DNS for every pinned request instead of trusting the live set.
    pub strict_pin_validation: bool,

    /// Overrides the machine hostname used for self-identification.
    pub self_hostname: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            query_timeout_secs: 5,
            resolver: ResolverKind::System,
            static_records: HashMap::new(),
            strict_pin_validation: false,
            self_hostname: None,
        }
    }
}

/// Where session records live between requests.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// The whole record travels inside the cookie.
    #[default]
    Embedded,
    /// The cookie carries only the id; the record lives in the session cache.
    Cached,
}

/// Session affinity configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: SessionMode,

    /// Cookie names are `{cookie_prefix}_{cluster}`.
    pub cookie_prefix: String,

    pub cookie_path: String,

    /// Cookie lifetime; `None` issues a browser-session cookie.
    pub cookie_max_age_secs: Option<u64>,

    pub cookie_secure: bool,

    pub cookie_http_only: bool,

    /// SameSite attribute (Strict, Lax or None).
    pub cookie_same_site: String,

    /// Base64 encoded 32-byte keys. The first seals new tokens, all of them open.
    pub keys: Vec<String>,

    /// Lifetime of cached records in seconds.
    pub cache_ttl_secs: u64,

    /// Maximum number of cached records.
    pub cache_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Embedded,
            cookie_prefix: "sr-affinity".to_string(),
            cookie_path: "/".to_string(),
            cookie_max_age_secs: None,
            cookie_secure: true,
            cookie_http_only: true,
            cookie_same_site: "Lax".to_string(),
            keys: Vec::new(),
            cache_ttl_secs: 3600,
            cache_capacity: 100_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Timeout for receiving upstream response headers in seconds.
    /// Does not bound the lifetime of upgraded connections.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Expose the chosen upstream in an `x-upstream-host` response header.
    pub debug_headers: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
            debug_headers: false,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
