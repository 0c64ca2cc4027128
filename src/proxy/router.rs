//! Per-request proxy orchestration.
//!
//! # Request States
//! ```text
//! Received ──▶ SessionResolved ──▶ TargetValidated ──▶ Forwarding ──▶ Completed
//!    │               │                    │                 │
//!    └───────────────┴────────────────────┴─────────────────┴──▶ Failed
//! ```
//!
//! # Responsibilities
//! - Match the `Host` header to a cluster
//! - Resolve the session and detect WebSocket handshakes
//! - Keep the session pinned, or re-pin it when its target left discovery
//! - Track the forward in the active-connections set
//! - Classify the outcome, persist the cookie, attach the debug header
//!
//! # Design Decisions
//! - A WebSocket whose pin goes stale is not rescued; the client reconnects
//! - Cookies are never rewritten on upgraded connections
//! - A panic in the forwarder becomes a 500, not a dropped connection

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use futures_util::FutureExt;

use crate::discovery::Directory;
use crate::error::{ForwardError, ProxyError};
use crate::load_balancer::{UpstreamSelector, UpstreamTarget};
use crate::net::{ConnectionGuard, ConnectionTracker};
use crate::observability::{metrics, ConnectionMetrics};
use crate::proxy::forwarder::{ForwardContext, Forwarder, PendingUpgrade};
use crate::proxy::outcome::Outcome;
use crate::proxy::transform::{ForwardingHeaders, Transform};
use crate::proxy::websocket;
use crate::registry::{request_host, BackendRegistry, Cluster};
use crate::session::{ResolvedSession, SessionRecord, SessionStore};

/// Response header naming the chosen upstream when debug headers are on.
pub static X_UPSTREAM_HOST: HeaderName = HeaderName::from_static("x-upstream-host");

/// An entry in the active-connections set plus the matching gauge.
/// Both are released together on drop.
struct InFlight {
    guard: ConnectionGuard,
    metrics: Arc<ConnectionMetrics>,
}

impl InFlight {
    fn open(guard: ConnectionGuard, metrics: Arc<ConnectionMetrics>) -> Self {
        metrics.connection_opened();
        Self { guard, metrics }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.metrics.connection_closed();
    }
}

pub struct ProxyRouter {
    registry: Arc<BackendRegistry>,
    directory: Arc<Directory>,
    sessions: Arc<SessionStore>,
    selector: UpstreamSelector,
    forwarder: Arc<dyn Forwarder>,
    transform: Arc<dyn Transform>,
    connections: ConnectionTracker,
    metrics: Arc<ConnectionMetrics>,
    debug_headers: bool,
}

impl ProxyRouter {
    pub fn new(
        registry: Arc<BackendRegistry>,
        directory: Arc<Directory>,
        sessions: Arc<SessionStore>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            registry,
            selector: UpstreamSelector::new(directory.clone()),
            directory,
            sessions,
            forwarder,
            transform: Arc::new(ForwardingHeaders),
            connections: ConnectionTracker::new(),
            metrics: Arc::new(ConnectionMetrics::new()),
            debug_headers: false,
        }
    }

    pub fn with_selector(mut self, selector: UpstreamSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_debug_headers(mut self, enabled: bool) -> Self {
        self.debug_headers = enabled;
        self
    }

    pub fn connections(&self) -> &ConnectionTracker {
        &self.connections
    }

    pub fn metrics(&self) -> &Arc<ConnectionMetrics> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Proxy one inbound request. Never fails; errors become responses.
    pub async fn handle(&self, request: Request<Body>, client_addr: Option<SocketAddr>) -> Response<Body> {
        let start = Instant::now();
        let method = request.method().clone();
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();

        let Some(cluster) = self.registry.route(&request) else {
            let host = request_host(&request);
            tracing::warn!(request_id = %request_id, host = ?host, "No cluster matched request host");
            metrics::record_request(method.as_str(), 404, "none", start);
            return ProxyError::Routing(host).into_response();
        };

        let response = match self.proxy(&cluster, request, client_addr, start, &request_id).await {
            Ok(response) => response,
            Err(err) => {
                self.report(&cluster, &request_id, &err);
                err.into_response()
            }
        };

        metrics::record_request(method.as_str(), response.status().as_u16(), &cluster.name, start);
        response
    }

    async fn proxy(
        &self,
        cluster: &Cluster,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
        start: Instant,
        request_id: &str,
    ) -> Result<Response<Body>, ProxyError> {
        let cookie_name = self.sessions.cookie_name(&cluster.name);
        let mut session = self.sessions.resolve(request.headers(), &cookie_name).await;

        // Sec-WebSocket-* headers alone, without an upgrade, are a plain request.
        let upgrade = websocket::is_upgrade_request(request.headers());
        let handshake = upgrade && websocket::is_handshake(request.headers());
        if handshake {
            self.metrics.connection_established(&cluster.name);
        }

        let pinned = session
            .record
            .is_pinned()
            .then(|| session.record.upstream_host.clone());
        let selection = self.selector.select(cluster, pinned.as_deref()).await?;
        if let Some(stale) = pinned.as_deref().filter(|_| !selection.reused_pin) {
            if handshake {
                tracing::warn!(
                    request_id = %request_id,
                    cluster = %cluster.name,
                    session_id = %session.record.id,
                    pinned = %stale,
                    "WebSocket session lost its upstream, reconnect lands on a new one"
                );
            }
            session.replace();
        }
        let target = selection.target;
        session.pin(&target.authority());

        let is_self = self.directory.is_self(&cluster.name, &target);
        let destination = destination(cluster, &target, is_self, request.uri())?;
        let upstream_kind = if is_self { "self" } else { "peer" };

        tracing::debug!(
            request_id = %request_id,
            cluster = %cluster.name,
            upstream = %target,
            upstream_kind,
            session_id = %session.record.id,
            websocket = handshake,
            "Forwarding request"
        );

        let in_flight = InFlight::open(
            self.connections.track(&cluster.name, &target, &session.record.id),
            self.metrics.clone(),
        );
        self.metrics.outbound_request(upstream_kind, start.elapsed());

        let ctx = ForwardContext {
            destination,
            client_addr,
            upgrade,
        };
        let forwarded = AssertUnwindSafe(self.forwarder.forward(request, &ctx, self.transform.as_ref()))
            .catch_unwind()
            .await
            .map_err(|panic| ProxyError::Internal(panic_message(panic.as_ref())))??;

        let status = forwarded.response.status();
        let outcome = Outcome::of_response(handshake, status, forwarded.upgrade.is_some());
        outcome.record(&self.metrics, &cluster.name);

        let mut response = forwarded.response;
        if self.debug_headers {
            if let Ok(value) = HeaderValue::from_str(&target.authority()) {
                response.headers_mut().insert(X_UPSTREAM_HOST.clone(), value);
            }
        }

        match forwarded.upgrade {
            Some(pending) => {
                in_flight.guard.upgraded();
                self.spawn_tunnel(pending, in_flight, session.record, cluster.name.clone(), target);
            }
            None => {
                drop(in_flight);
                if status != StatusCode::SWITCHING_PROTOCOLS && !status.is_server_error() {
                    self.persist(&mut response, &cookie_name, &session).await;
                }
            }
        }

        Ok(response)
    }

    async fn persist(&self, response: &mut Response<Body>, cookie_name: &str, session: &ResolvedSession) {
        self.sessions
            .persist(response.headers_mut(), cookie_name, session)
            .await;
    }

    /// Relay an upgraded connection in the background. The in-flight entry
    /// lives until the tunnel closes.
    fn spawn_tunnel(
        &self,
        pending: PendingUpgrade,
        in_flight: InFlight,
        mut record: SessionRecord,
        cluster: String,
        target: UpstreamTarget,
    ) {
        let sessions = self.sessions.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let connection_id = in_flight.guard.id();
            record.bind_connection(connection_id.to_string());
            sessions.save_record(&record).await;

            let result = pending.run().await;
            let outcome = Outcome::of_tunnel(&result);
            outcome.record(&metrics, &cluster);
            match result {
                Ok(stats) => tracing::info!(
                    connection_id = %connection_id,
                    cluster = %cluster,
                    upstream = %target,
                    client_to_upstream = stats.client_to_upstream,
                    upstream_to_client = stats.upstream_to_client,
                    "WebSocket connection closed"
                ),
                Err(e) if !outcome.is_failure() => tracing::debug!(
                    connection_id = %connection_id,
                    cluster = %cluster,
                    upstream = %target,
                    reason = %e,
                    "WebSocket closed by client"
                ),
                Err(e) => tracing::error!(
                    connection_id = %connection_id,
                    cluster = %cluster,
                    upstream = %target,
                    error = %e,
                    "WebSocket tunnel failed"
                ),
            }

            record.clear_connection();
            sessions.save_record(&record).await;
            drop(in_flight);
        });
    }

    fn report(&self, cluster: &Cluster, request_id: &str, err: &ProxyError) {
        match err {
            ProxyError::Forward(e) => {
                let outcome = Outcome::of_error(e);
                outcome.record(&self.metrics, &cluster.name);
                if outcome.is_failure() {
                    tracing::error!(request_id = %request_id, cluster = %cluster.name, error = %e, "Upstream request failed");
                } else {
                    tracing::debug!(request_id = %request_id, cluster = %cluster.name, reason = %e, "Client cancelled request");
                }
            }
            ProxyError::NoUpstream(_) => {
                tracing::warn!(request_id = %request_id, cluster = %cluster.name, "No upstream available");
            }
            ProxyError::Internal(message) => {
                self.metrics.outbound_failure("panic");
                tracing::error!(request_id = %request_id, cluster = %cluster.name, error = %message, "Forwarder panicked");
            }
            ProxyError::Routing(_) => {}
        }
    }
}

/// Absolute upstream URI for `original`, keeping path and query.
fn destination(cluster: &Cluster, target: &UpstreamTarget, is_self: bool, original: &Uri) -> Result<Uri, ForwardError> {
    let path = original.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let uri = format!("{}{}", cluster.base_uri(target, is_self), path);
    uri.parse().map_err(|_| ForwardError::InvalidDestination(uri))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
