use std::collections::BTreeMap;
use std::time::UNIX_EPOCH;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::load_balancer::UpstreamTarget;
use crate::net::ConnectionInfo;
use crate::observability::ConnectionSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub session_mode: &'static str,
    /// This process's instance per cluster.
    pub self_identities: BTreeMap<String, UpstreamTarget>,
    pub connections: ConnectionSnapshot,
}

#[derive(Serialize)]
pub struct ClusterStatus {
    pub name: String,
    pub hosts: Vec<String>,
    pub discovery_name: String,
    pub port: u16,
    pub live: Vec<UpstreamTarget>,
    /// Seconds since the epoch of the last successful refresh.
    pub refreshed_at: Option<u64>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let proxy = &state.proxy;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        session_mode: proxy.sessions().mode_name(),
        self_identities: proxy
            .directory()
            .self_identities()
            .iter()
            .map(|(cluster, me)| (cluster.clone(), me.clone()))
            .collect(),
        connections: proxy.metrics().snapshot(),
    })
}

pub async fn get_upstreams(State(state): State<AdminState>) -> Json<Vec<ClusterStatus>> {
    let proxy = &state.proxy;
    let statuses = proxy
        .registry()
        .clusters()
        .iter()
        .map(|cluster| {
            let live = proxy.directory().live_set(&cluster.name);
            ClusterStatus {
                name: cluster.name.clone(),
                hosts: cluster.hosts.clone(),
                discovery_name: cluster.discovery_name.clone(),
                port: cluster.port,
                live: live.as_ref().map(|s| s.targets.clone()).unwrap_or_default(),
                refreshed_at: live
                    .and_then(|s| s.refreshed_at.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_secs()),
            }
        })
        .collect();

    Json(statuses)
}

pub async fn get_connections(State(state): State<AdminState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.proxy.connections().list())
}
