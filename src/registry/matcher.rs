//! Host header matching.
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110 host names)
//! - The port part of the Host header is ignored
//! - HTTP/2 requests carry the host in the URI authority instead

use axum::http::{header, Request};

/// Lowercase a host value and strip any port.
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        // [v6]:port
        rest.split(']').next().unwrap_or(rest)
    } else {
        match raw.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => raw,
        }
    };
    host.trim_end_matches('.').to_lowercase()
}

/// The routing host of a request, normalized.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(normalize_host)
        .or_else(|| req.uri().host().map(normalize_host))
        .filter(|h| !h.is_empty())
}
