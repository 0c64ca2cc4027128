//! Session persistence strategies.
//!
//! # Responsibilities
//! - Resolve the inbound request's session, minting one when needed
//! - Persist the session after a forward and decide when the cookie changes
//!
//! # Modes
//! ```text
//! Embedded:  cookie = seal(id, upstream_host, connection_id)
//! Cached:    cookie = seal(id)          cache[id] = SessionRecord
//! ```
//!
//! # Design Decisions
//! - The cookie is only rewritten for new sessions or changed records, so
//!   repeat requests on a healthy pin see a stable cookie value
//! - Cache failures count as misses; a fresh session still gets minted

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;

use crate::observability::metrics;
use crate::session::cache::SessionCache;
use crate::session::codec::SessionCodec;
use crate::session::cookie::{find_cookie, CookiePolicy};
use crate::session::record::SessionRecord;

/// A session as seen by one request.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub record: SessionRecord,
    /// A valid cookie arrived with the request and resolved to `record`.
    pub had_cookie: bool,
    /// `record` changed since it was resolved (new pin or replacement).
    pub dirty: bool,
}

impl ResolvedSession {
    fn fresh() -> Self {
        Self {
            record: SessionRecord::new(),
            had_cookie: false,
            dirty: true,
        }
    }

    fn restored(record: SessionRecord) -> Self {
        Self {
            record,
            had_cookie: true,
            dirty: false,
        }
    }

    /// Pin to `host` if unpinned. Marks the session dirty on change.
    pub fn pin(&mut self, host: &str) {
        if self.record.pin(host) {
            self.dirty = true;
        }
    }

    /// Replace the record after its pin went stale.
    pub fn replace(&mut self) {
        self.record = SessionRecord::new();
        self.dirty = true;
    }

    /// Whether the response must carry a (new) session cookie.
    pub fn needs_cookie(&self) -> bool {
        !self.had_cookie || self.dirty
    }
}

/// The whole record travels inside the cookie.
pub struct EmbeddedSession {
    codec: SessionCodec,
    policy: CookiePolicy,
}

impl EmbeddedSession {
    pub fn new(codec: SessionCodec, policy: CookiePolicy) -> Self {
        Self { codec, policy }
    }

    fn resolve(&self, headers: &HeaderMap, cookie_name: &str) -> ResolvedSession {
        find_cookie(headers, cookie_name)
            .and_then(|token| self.codec.decode(&token))
            .map(ResolvedSession::restored)
            .unwrap_or_else(ResolvedSession::fresh)
    }

    fn persist(&self, headers: &mut HeaderMap, cookie_name: &str, session: &ResolvedSession) {
        if !session.needs_cookie() {
            return;
        }
        match self.codec.encode(&session.record) {
            Ok(token) => self.policy.write(headers, cookie_name, &token),
            Err(e) => tracing::error!(session_id = %session.record.id, error = %e, "Failed to seal session"),
        }
    }
}

/// The cookie carries only the id; records live in a [`SessionCache`].
pub struct CachedSession {
    codec: SessionCodec,
    policy: CookiePolicy,
    cache: Arc<dyn SessionCache>,
    ttl: Duration,
}

impl CachedSession {
    pub fn new(
        codec: SessionCodec,
        policy: CookiePolicy,
        cache: Arc<dyn SessionCache>,
        ttl: Duration,
    ) -> Self {
        Self { codec, policy, cache, ttl }
    }

    async fn resolve(&self, headers: &HeaderMap, cookie_name: &str) -> ResolvedSession {
        let Some(id) = find_cookie(headers, cookie_name)
            .and_then(|token| self.codec.decode(&token))
            .map(|r| r.id)
        else {
            return ResolvedSession::fresh();
        };

        match self.cache.get(&id).await {
            Ok(Some(record)) => ResolvedSession::restored(record),
            Ok(None) => {
                tracing::debug!(session_id = %id, "Session not in cache, minting a new one");
                ResolvedSession::fresh()
            }
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Session cache read failed");
                metrics::record_cache_error("get");
                ResolvedSession::fresh()
            }
        }
    }

    async fn save(&self, record: &SessionRecord) {
        if let Err(e) = self.cache.set(&record.id, record, self.ttl).await {
            tracing::warn!(session_id = %record.id, error = %e, "Session cache write failed");
            metrics::record_cache_error("set");
        }
    }

    async fn persist(&self, headers: &mut HeaderMap, cookie_name: &str, session: &ResolvedSession) {
        // Every persist refreshes the TTL of active sessions.
        self.save(&session.record).await;

        if !session.needs_cookie() {
            return;
        }
        let id_only = SessionRecord {
            id: session.record.id.clone(),
            connection_id: String::new(),
            upstream_host: String::new(),
        };
        match self.codec.encode(&id_only) {
            Ok(token) => self.policy.write(headers, cookie_name, &token),
            Err(e) => tracing::error!(session_id = %session.record.id, error = %e, "Failed to seal session id"),
        }
    }
}

/// Session store strategy, selected at startup.
pub enum SessionStore {
    Embedded(EmbeddedSession),
    Cached(CachedSession),
}

impl SessionStore {
    /// Resolve the request's session. Always yields a record.
    pub async fn resolve(&self, headers: &HeaderMap, cookie_name: &str) -> ResolvedSession {
        let session = match self {
            SessionStore::Embedded(store) => store.resolve(headers, cookie_name),
            SessionStore::Cached(store) => store.resolve(headers, cookie_name).await,
        };
        metrics::record_session(if session.had_cookie { "resumed" } else { "new" });
        session
    }

    /// Persist the session and set the cookie on `headers` when needed.
    pub async fn persist(&self, headers: &mut HeaderMap, cookie_name: &str, session: &ResolvedSession) {
        match self {
            SessionStore::Embedded(store) => store.persist(headers, cookie_name, session),
            SessionStore::Cached(store) => store.persist(headers, cookie_name, session).await,
        }
    }

    /// Save a record change that happens outside any response (connection
    /// bind/unbind). The embedded cookie cannot be rewritten mid-stream, so
    /// only the cached mode records it.
    pub async fn save_record(&self, record: &SessionRecord) {
        if let SessionStore::Cached(store) = self {
            store.save(record).await;
        }
    }

    /// Cookie name carrying sessions for `cluster`.
    pub fn cookie_name(&self, cluster: &str) -> String {
        let policy = match self {
            SessionStore::Embedded(store) => &store.policy,
            SessionStore::Cached(store) => &store.policy,
        };
        policy.cookie_name(cluster)
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            SessionStore::Embedded(_) => "embedded",
            SessionStore::Cached(_) => "cached",
        }
    }
}
