//! Upstream target abstraction.
//!
//! # Responsibilities
//! - Represent one discovered backend instance (SRV target + port)
//! - Convert to and from the `host:port` form stored in session pins

use std::fmt;

use serde::Serialize;

/// A single backend instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UpstreamTarget {
    /// SRV target name, lowercased, without the trailing root dot.
    pub host: String,
    pub port: u16,
}

impl UpstreamTarget {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            host: normalize_name(host.as_ref()),
            port,
        }
    }

    /// Parse a pinned `host:port` string.
    pub fn parse(authority: &str) -> Option<Self> {
        let (host, port) = authority.rsplit_once(':')?;
        let port = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host.trim_start_matches('[').trim_end_matches(']'), port))
    }

    /// The `host:port` form stored in sessions and used as URI authority.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Lowercase a DNS name and drop the root label dot.
pub fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_srv_names() {
        let t = UpstreamTarget::new("Node-A.Chat.Internal.", 5000);
        assert_eq!(t.host, "node-a.chat.internal");
        assert_eq!(t.authority(), "node-a.chat.internal:5000");
    }

    #[test]
    fn parses_authorities() {
        assert_eq!(
            UpstreamTarget::parse("node-a:5000"),
            Some(UpstreamTarget::new("node-a", 5000))
        );
        assert_eq!(
            UpstreamTarget::parse("[::1]:5000").map(|t| t.authority()),
            Some("[::1]:5000".to_string())
        );
        assert_eq!(UpstreamTarget::parse("node-a"), None);
        assert_eq!(UpstreamTarget::parse(":5000"), None);
        assert_eq!(UpstreamTarget::parse("node-a:http"), None);
    }
}
