//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, connections, discovery, sessions)
//! - Expose Prometheus-compatible metrics endpoint
//! - Keep an in-process view of connection counts for the admin API
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_connections_established_total` (counter): WebSocket handshakes seen
//! - `proxy_current_connections` (gauge): in-flight forwards
//! - `proxy_handshake_failures_total` (counter): upgrades the upstream refused
//! - `proxy_outbound_requests_total` / `proxy_outbound_failures_total`
//! - `proxy_queue_duration_seconds` (histogram): receipt → forward start
//! - `proxy_live_hosts` (gauge): live set size per cluster

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, cluster: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "cluster" => cluster.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "cluster" => cluster.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_session(outcome: &'static str) {
    counter!("proxy_sessions_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_error(op: &'static str) {
    counter!("proxy_session_cache_errors_total", "op" => op).increment(1);
}

pub fn record_discovery(cluster: &str, outcome: &'static str) {
    counter!(
        "proxy_discovery_refresh_total",
        "cluster" => cluster.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_live_hosts(cluster: &str, count: usize) {
    gauge!("proxy_live_hosts", "cluster" => cluster.to_string()).set(count as f64);
}

/// Point-in-time copy of [`ConnectionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub connections_established: u64,
    pub current_connections: u64,
    pub handshake_failures: u64,
    pub outbound_requests: u64,
    pub outbound_failures: u64,
}

/// Connection-level counters and gauges.
///
/// Mirrors every update into the `metrics` facade and keeps its own atomics
/// so the admin API and tests can read them without a scrape.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    connections_established: AtomicU64,
    current_connections: AtomicU64,
    handshake_failures: AtomicU64,
    outbound_requests: AtomicU64,
    outbound_failures: AtomicU64,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_established(&self, cluster: &str) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        counter!("proxy_connections_established_total", "cluster" => cluster.to_string()).increment(1);
    }

    pub fn connection_opened(&self) {
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        gauge!("proxy_current_connections").increment(1.0);
    }

    pub fn connection_closed(&self) {
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
        gauge!("proxy_current_connections").decrement(1.0);
    }

    pub fn handshake_failed(&self, cluster: &str) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
        counter!("proxy_handshake_failures_total", "cluster" => cluster.to_string()).increment(1);
    }

    /// Count an outbound request and how long it waited before forwarding.
    pub fn outbound_request(&self, upstream_kind: &'static str, queued: Duration) {
        self.outbound_requests.fetch_add(1, Ordering::Relaxed);
        counter!("proxy_outbound_requests_total", "target" => upstream_kind).increment(1);
        histogram!("proxy_queue_duration_seconds").record(queued.as_secs_f64());
    }

    pub fn outbound_failure(&self, kind: &'static str) {
        self.outbound_failures.fetch_add(1, Ordering::Relaxed);
        counter!("proxy_outbound_failures_total", "kind" => kind).increment(1);
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            connections_established: self.connections_established.load(Ordering::Relaxed),
            current_connections: self.current_connections.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            outbound_requests: self.outbound_requests.load(Ordering::Relaxed),
            outbound_failures: self.outbound_failures.load(Ordering::Relaxed),
        }
    }
}
