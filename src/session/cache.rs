//! Session record cache.
//!
//! # Responsibilities
//! - Define the key-value capability used in cached session mode
//! - Provide an in-process implementation with per-entry expiry
//!
//! # Design Decisions
//! - Remote caches plug in behind [`SessionCache`]; callers treat every
//!   error as a miss, so an unreachable cache degrades affinity instead of
//!   failing requests
//! - Expired entries are dropped lazily on read and eagerly when full

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::session::record::SessionRecord;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("session cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store for session records.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SessionRecord>, CacheError>;

    async fn set(&self, key: &str, record: &SessionRecord, ttl: Duration) -> Result<(), CacheError>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    record: SessionRecord,
    expires_at: Instant,
}

/// A thread-safe in-memory session cache.
#[derive(Clone)]
pub struct MemorySessionCache {
    inner: Arc<DashMap<String, CacheEntry>>,
    capacity: usize,
}

impl MemorySessionCache {
    /// Create a new empty cache holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of stored records, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, entry| entry.expires_at > now);
        before - self.inner.len()
    }

    fn make_room(&self) {
        if self.purge_expired() > 0 {
            return;
        }
        // Still full: evict whatever expires soonest.
        let victim = self
            .inner
            .iter()
            .min_by_key(|e| e.value().expires_at)
            .map(|e| e.key().clone());
        if let Some(key) = victim {
            self.inner.remove(&key);
        }
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn get(&self, key: &str) -> Result<Option<SessionRecord>, CacheError> {
        let now = Instant::now();
        let hit = self.inner.get(key).map(|e| e.value().clone());
        match hit {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.record)),
            Some(_) => {
                self.inner.remove_if(key, |_, e| e.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, record: &SessionRecord, ttl: Duration) -> Result<(), CacheError> {
        if !self.inner.contains_key(key) && self.inner.len() >= self.capacity {
            self.make_room();
        }
        self.inner.insert(
            key.to_string(),
            CacheEntry {
                record: record.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}
