//! Process-wide cache of derived job tools.
//!
//! Bounded LRU keyed by job identifier. Entries carry an expiry deadline that
//! is checked on read; an expired entry reads as absent but stays in place
//! until capacity pressure displaces it.

use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::types::ToolDefinition;

pub const DEFAULT_CACHE_CAPACITY: usize = 500;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Cached tool plus its expiry deadline.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub tool: Arc<ToolDefinition>,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Thread-safe LRU cache for job tool definitions.
pub struct DerivedToolCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl DerivedToolCache {
    /// Create cache with defaults (500 entries, 30 minute TTL).
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_config(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            ttl,
        }
    }

    /// Fresh entry for `key`, if any. Only fresh hits are promoted; an
    /// expired entry keeps its place and ages out under capacity pressure.
    pub fn get(&self, key: &str) -> Option<Arc<ToolDefinition>> {
        let mut entries = self.entries.lock();
        if entries.peek(key)?.is_expired() {
            debug!("Cache entry for '{}' expired", key);
            return None;
        }
        entries.get(key).map(|entry| Arc::clone(&entry.tool))
    }

    /// Store a job tool. Returns false for static and proxied tools, which
    /// are never cached.
    pub fn put(&self, key: impl Into<String>, tool: Arc<ToolDefinition>) -> bool {
        if !tool.is_job() {
            return false;
        }
        let entry = CacheEntry {
            tool,
            expires_at: Instant::now() + self.ttl,
        };
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.into(), entry) {
            debug!("Evicted '{}' from tool cache", evicted);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `key` is resident, expired or not. Does not touch LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }
}

impl Default for DerivedToolCache {
    fn default() -> Self {
        Self::new()
    }
}
