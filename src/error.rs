//! Request-level error taxonomy.
//!
//! Every failure that reaches the HTTP surface is a [`ProxyError`]. Discovery,
//! session decode and cache failures are recovered where they happen and
//! never show up here.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failure reported by the forwarding capability.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid destination {0}")]
    InvalidDestination(String),

    #[error("upstream connect failed: {0}")]
    Connect(String),

    #[error("no upstream response within {0:?}")]
    Timeout(Duration),

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upgrade failed: {0}")]
    Upgrade(String),

    /// The client went away. Expected during normal disconnects.
    #[error("client cancelled: {0}")]
    ClientCancelled(String),
}

impl ForwardError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::InvalidDestination(_) => "invalid_destination",
            ForwardError::Connect(_) => "connect",
            ForwardError::Timeout(_) => "timeout",
            ForwardError::Transport(_) => "transport",
            ForwardError::Upgrade(_) => "upgrade",
            ForwardError::ClientCancelled(_) => "client_cancelled",
        }
    }

    pub fn is_client_cancelled(&self) -> bool {
        matches!(self, ForwardError::ClientCancelled(_))
    }
}

/// Errors that terminate a single proxied request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no cluster serves host {0:?}")]
    Routing(Option<String>),

    #[error("no upstream available in cluster {0}")]
    NoUpstream(String),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Routing(_) => StatusCode::NOT_FOUND,
            ProxyError::NoUpstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Forward(ForwardError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Forward(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            ProxyError::Routing(_) => "No matching cluster found",
            ProxyError::NoUpstream(_) => "No upstream available",
            ProxyError::Forward(ForwardError::Timeout(_)) => "Upstream timed out",
            ProxyError::Forward(_) => "Upstream request failed",
            ProxyError::Internal(_) => "Internal proxy error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.public_message()).into_response()
    }
}
