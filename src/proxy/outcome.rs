//! Forwarding outcome classification.
//!
//! Decides what a finished forward means for logs and metrics. Client
//! hang-ups are normal traffic and never count as failures.

use axum::http::StatusCode;

use crate::error::ForwardError;
use crate::observability::ConnectionMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The upstream answered a plain request.
    Responded,
    /// A WebSocket handshake was accepted.
    Upgraded,
    /// A WebSocket handshake got a non-101 answer.
    HandshakeRejected,
    /// The client went away.
    ClientCancelled,
    /// Transport-level failure, labelled by kind.
    Failed(&'static str),
}

impl Outcome {
    /// `handshake` is true only for WebSocket handshakes that asked to upgrade.
    pub fn of_response(handshake: bool, status: StatusCode, upgraded: bool) -> Self {
        match (handshake, upgraded) {
            (_, true) => Outcome::Upgraded,
            (true, false) if status != StatusCode::SWITCHING_PROTOCOLS => Outcome::HandshakeRejected,
            _ => Outcome::Responded,
        }
    }

    pub fn of_error(err: &ForwardError) -> Self {
        if err.is_client_cancelled() {
            Outcome::ClientCancelled
        } else {
            Outcome::Failed(err.kind())
        }
    }

    pub fn of_tunnel<T>(result: &Result<T, ForwardError>) -> Self {
        match result {
            Ok(_) => Outcome::Upgraded,
            Err(e) => Self::of_error(e),
        }
    }

    /// Whether the outcome deserves an error-level log entry.
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// Update connection metrics for this outcome.
    pub fn record(&self, metrics: &ConnectionMetrics, cluster: &str) {
        match self {
            Outcome::HandshakeRejected => metrics.handshake_failed(cluster),
            Outcome::Failed(kind) => metrics.outbound_failure(*kind),
            _ => {}
        }
    }
}
