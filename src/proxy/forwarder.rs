//! Forwarding capability.
//!
//! # Responsibilities
//! - Send the transformed request to the destination upstream
//! - Bound the wait for upstream response headers
//! - Hand back a pending tunnel when the upstream switches protocols
//!
//! # Design Decisions
//! - [`Forwarder`] is a trait so the router can be exercised without sockets
//! - The header timeout never bounds an upgraded connection's lifetime

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, Uri};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::TimeoutConfig;
use crate::error::ForwardError;
use crate::proxy::transform::Transform;
use crate::proxy::websocket::{self, TunnelStats};

/// Per-forward inputs besides the request itself.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    /// Absolute URI on the chosen upstream.
    pub destination: Uri,
    pub client_addr: Option<SocketAddr>,
    /// The inbound request asked for a protocol upgrade.
    pub upgrade: bool,
}

/// An upgraded connection whose bytes still have to be relayed.
pub struct PendingUpgrade(BoxFuture<'static, Result<TunnelStats, ForwardError>>);

impl PendingUpgrade {
    pub fn new<F>(tunnel: F) -> Self
    where
        F: Future<Output = Result<TunnelStats, ForwardError>> + Send + 'static,
    {
        Self(Box::pin(tunnel))
    }

    /// Relay until either side closes.
    pub async fn run(self) -> Result<TunnelStats, ForwardError> {
        self.0.await
    }
}

impl std::fmt::Debug for PendingUpgrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PendingUpgrade")
    }
}

/// Result of a forward that reached the upstream.
#[derive(Debug)]
pub struct Forwarded {
    pub response: Response<Body>,
    pub upgrade: Option<PendingUpgrade>,
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        request: Request<Body>,
        ctx: &ForwardContext,
        transform: &dyn Transform,
    ) -> Result<Forwarded, ForwardError>;
}

/// [`Forwarder`] over a pooled hyper client.
#[derive(Clone)]
pub struct HyperForwarder {
    client: Client<HttpConnector, Body>,
    response_timeout: Duration,
}

impl HyperForwarder {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            response_timeout: Duration::from_secs(timeouts.request_secs),
        }
    }
}

#[async_trait]
impl Forwarder for HyperForwarder {
    async fn forward(
        &self,
        mut request: Request<Body>,
        ctx: &ForwardContext,
        transform: &dyn Transform,
    ) -> Result<Forwarded, ForwardError> {
        let client_upgrade = ctx.upgrade.then(|| hyper::upgrade::on(&mut request));

        let (mut parts, body) = request.into_parts();
        transform.transform_request(&mut parts, ctx);
        let outbound = Request::from_parts(parts, body);

        let mut response = tokio::time::timeout(self.response_timeout, self.client.request(outbound))
            .await
            .map_err(|_| ForwardError::Timeout(self.response_timeout))?
            .map_err(|e| {
                if e.is_connect() {
                    ForwardError::Connect(e.to_string())
                } else {
                    ForwardError::Transport(e.to_string())
                }
            })?;

        let upgrade = match client_upgrade {
            Some(client) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                let upstream = hyper::upgrade::on(&mut response);
                Some(PendingUpgrade::new(websocket::tunnel(client, upstream)))
            }
            _ => None,
        };

        let (mut parts, body) = response.into_parts();
        transform.transform_response(&mut parts, ctx);
        Ok(Forwarded {
            response: Response::from_parts(parts, Body::new(body)),
            upgrade,
        })
    }
}
