//! Keyed byte cache with per-entry TTL.
//!
//! The cache is strictly an accelerator: every caller treats a miss and an
//! error identically, and no operation in the system fails because the cache
//! failed. Values are opaque byte strings; callers own serialization.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use toolmesh_core::MeshResult;

/// Cache backend trait for pluggable implementations.
///
/// Implementations must be thread-safe. A `None` TTL means the entry lives
/// until deleted or evicted.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get a value. `Ok(None)` on miss or expired entry.
    async fn get(&self, key: &str) -> MeshResult<Option<Vec<u8>>>;

    /// Set a value with an optional TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> MeshResult<()>;

    /// Delete a value. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> MeshResult<()>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-memory cache with lazy expiry.
///
/// Expired entries are dropped on read; `sweep` removes the remainder and is
/// called opportunistically by `set` once the map grows past `sweep_watermark`.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sweep_watermark: usize,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::with_sweep_watermark(10_000)
    }

    pub fn with_sweep_watermark(sweep_watermark: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweep_watermark,
        }
    }

    /// Remove all expired entries, returning how many were dropped.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.expired(now));
        before - entries.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> MeshResult<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
            }
        }

        // Entry exists but is expired: upgrade to a write lock and drop it.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.expired(now) {
                entries.remove(key);
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> MeshResult<()> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });
        if entries.len() > self.sweep_watermark {
            let now = Instant::now();
            entries.retain(|_, e| !e.expired(now));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> MeshResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}
