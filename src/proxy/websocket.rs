//! WebSocket handshake detection and upgrade tunnelling.
//!
//! # Responsibilities
//! - Detect WebSocket handshakes (hard-affinity requests)
//! - Detect generic `Connection: upgrade` requests for header handling
//! - Relay raw bytes between the upgraded client and upstream connections
//!
//! # Data Flow
//! ```text
//! Client ←──── upgraded bytes ────→ Proxy ←──── upgraded bytes ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Frames are not parsed; the tunnel copies bytes both ways
//! - Close frames and ping/pong pass through untouched
//! - Each direction is relayed on its own so a failure is charged to the
//!   side that caused it: client faults are cancellations, upstream faults
//!   are transport errors

use std::io;

use axum::http::{header, HeaderMap};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ForwardError;

/// Headers that only appear on WebSocket handshakes.
pub const HANDSHAKE_HEADERS: [header::HeaderName; 5] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_ACCEPT,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::SEC_WEBSOCKET_PROTOCOL,
    header::SEC_WEBSOCKET_VERSION,
];

/// True when any WebSocket handshake header is present.
pub fn is_handshake(headers: &HeaderMap) -> bool {
    HANDSHAKE_HEADERS.iter().any(|name| headers.contains_key(name))
}

/// True when the request asks for a protocol upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    connection_upgrade && headers.contains_key(header::UPGRADE)
}

/// Bytes relayed by a finished tunnel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TunnelStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Relay buffer per direction.
const RELAY_BUFFER: usize = 8 * 1024;

/// One end of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Upstream,
}

impl Side {
    fn peer(self) -> Self {
        match self {
            Side::Client => Side::Upstream,
            Side::Upstream => Side::Client,
        }
    }

    fn error(self, err: &io::Error) -> ForwardError {
        match self {
            Side::Client => ForwardError::ClientCancelled(err.to_string()),
            Side::Upstream => ForwardError::Transport(format!("upstream: {err}")),
        }
    }
}

/// Wait for both sides to finish upgrading, then copy bytes until both
/// directions reach EOF or either side fails.
pub async fn tunnel(client: OnUpgrade, upstream: OnUpgrade) -> Result<TunnelStats, ForwardError> {
    let upstream = upstream
        .await
        .map_err(|e| ForwardError::Upgrade(format!("upstream: {e}")))?;
    // The client side only fails to upgrade when it disconnected first.
    let client = client
        .await
        .map_err(|e| ForwardError::ClientCancelled(e.to_string()))?;

    let (client_read, client_write) = tokio::io::split(TokioIo::new(client));
    let (upstream_read, upstream_write) = tokio::io::split(TokioIo::new(upstream));

    let (client_to_upstream, upstream_to_client) = tokio::try_join!(
        relay(client_read, upstream_write, Side::Client),
        relay(upstream_read, client_write, Side::Upstream),
    )?;

    Ok(TunnelStats {
        client_to_upstream,
        upstream_to_client,
    })
}

/// Copy `from` into `to` until EOF, then half-close `to`. Read errors are
/// charged to `source`, write errors to its peer.
async fn relay<R, W>(mut from: R, mut to: W, source: Side) -> Result<u64, ForwardError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let sink = source.peer();
    let mut buf = vec![0u8; RELAY_BUFFER];
    let mut total = 0u64;

    loop {
        let n = from.read(&mut buf).await.map_err(|e| source.error(&e))?;
        if n == 0 {
            break;
        }
        to.write_all(&buf[..n]).await.map_err(|e| sink.error(&e))?;
        to.flush().await.map_err(|e| sink.error(&e))?;
        total += n as u64;
    }

    // The peer may already be gone; a clean EOF is still a clean close.
    let _ = to.shutdown().await;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn handshake_detected_by_any_header() {
        let mut headers = HeaderMap::new();
        assert!(!is_handshake(&headers));

        headers.insert(header::SEC_WEBSOCKET_VERSION, HeaderValue::from_static("13"));
        assert!(is_handshake(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("json"));
        assert!(is_handshake(&headers));
    }

    #[test]
    fn upgrade_request_needs_both_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(!is_upgrade_request(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade_request(&headers));

        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        assert!(!is_upgrade_request(&headers));
    }

    #[tokio::test]
    async fn relay_counts_bytes_and_half_closes() {
        let (to, mut peer) = tokio::io::duplex(64);
        let copied = relay(&b"hello"[..], to, Side::Client).await.unwrap();
        assert_eq!(copied, 5);

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn upstream_gone_is_a_transport_error() {
        // Client bytes cannot be delivered because the upstream end closed.
        let (to, peer) = tokio::io::duplex(64);
        drop(peer);

        let err = relay(&b"ping"[..], to, Side::Client).await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test]
    async fn client_gone_is_a_cancellation() {
        let (to, peer) = tokio::io::duplex(64);
        drop(peer);

        let err = relay(&b"frame"[..], to, Side::Upstream).await.unwrap_err();
        assert!(err.is_client_cancelled());
    }

    #[tokio::test]
    async fn read_failure_is_charged_to_the_source() {
        struct Reset;
        impl AsyncRead for Reset {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _: &mut std::task::Context<'_>,
                _: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<io::Result<()>> {
                std::task::Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()))
            }
        }

        let err = relay(Reset, tokio::io::sink(), Side::Upstream).await.unwrap_err();
        assert_eq!(err.kind(), "transport");

        let err = relay(Reset, tokio::io::sink(), Side::Client).await.unwrap_err();
        assert!(err.is_client_cancelled());
    }
}
