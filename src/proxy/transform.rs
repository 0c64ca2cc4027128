//! Request and response rewriting around the forward.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (kept for upgrades, which need them)
//! - Add `X-Forwarded-For`, `X-Forwarded-Host` and `X-Forwarded-Proto`
//! - Point the outbound `Host` header at the chosen upstream

use axum::http::{header, request, response, HeaderMap, HeaderName, HeaderValue};

use crate::proxy::forwarder::ForwardContext;

/// Hooks run immediately before and after the forward.
pub trait Transform: Send + Sync {
    fn transform_request(&self, parts: &mut request::Parts, ctx: &ForwardContext);

    fn transform_response(&self, parts: &mut response::Parts, ctx: &ForwardContext);
}

const HOP_BY_HOP: [&str; 7] = [
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// The proxy's only [`Transform`].
#[derive(Debug, Clone, Default)]
pub struct ForwardingHeaders;

impl ForwardingHeaders {
    fn strip_hop_by_hop(headers: &mut HeaderMap, upgrade: bool) {
        // Headers named in `Connection` are hop-by-hop too.
        let listed: Vec<HeaderName> = headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
            .filter(|name| !(upgrade && *name == header::UPGRADE))
            .collect();
        for name in listed {
            headers.remove(name);
        }
        for name in HOP_BY_HOP {
            headers.remove(name);
        }
        if !upgrade {
            headers.remove(header::CONNECTION);
            headers.remove(header::UPGRADE);
        }
    }
}

impl Transform for ForwardingHeaders {
    fn transform_request(&self, parts: &mut request::Parts, ctx: &ForwardContext) {
        let original_host = parts.headers.get(header::HOST).cloned();
        Self::strip_hop_by_hop(&mut parts.headers, ctx.upgrade);

        if let Some(addr) = ctx.client_addr {
            let ip = addr.ip().to_string();
            let value = match parts.headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip,
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                parts.headers.insert(X_FORWARDED_FOR.clone(), value);
            }
        }
        if let Some(host) = original_host {
            parts.headers.insert(X_FORWARDED_HOST.clone(), host);
        }
        parts
            .headers
            .insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("http"));

        if let Some(authority) = ctx.destination.authority() {
            if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(header::HOST, value);
            }
        }
        parts.uri = ctx.destination.clone();
    }

    fn transform_response(&self, parts: &mut response::Parts, ctx: &ForwardContext) {
        let upgraded = ctx.upgrade && parts.status == axum::http::StatusCode::SWITCHING_PROTOCOLS;
        Self::strip_hop_by_hop(&mut parts.headers, upgraded);
    }
}
