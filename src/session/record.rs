//! Session record: a client's pinned backend.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The affinity state the proxy keeps for one client.
///
/// `upstream_host` is set once, on the first successful forward, and never
/// changed afterwards. A record whose pin stops resolving is replaced by a
/// fresh one rather than re-pinned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque unique identifier.
    pub id: String,
    /// Live WebSocket connection bound to this session, empty when none.
    pub connection_id: String,
    /// Backend instance this session is pinned to, empty when unpinned.
    pub upstream_host: String,
}

impl SessionRecord {
    /// Mint a new, unpinned session with a random id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            connection_id: String::new(),
            upstream_host: String::new(),
        }
    }

    pub fn is_pinned(&self) -> bool {
        !self.upstream_host.is_empty()
    }

    /// Pin the session to `host` if it is not pinned yet.
    ///
    /// Returns true when the pin was written.
    pub fn pin(&mut self, host: &str) -> bool {
        if self.is_pinned() {
            return false;
        }
        self.upstream_host = host.to_string();
        true
    }

    pub fn has_connection(&self) -> bool {
        !self.connection_id.is_empty()
    }

    pub fn bind_connection(&mut self, connection_id: impl Into<String>) {
        self.connection_id = connection_id.into();
    }

    pub fn clear_connection(&mut self) {
        self.connection_id.clear();
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}
