//! TTL Cache Store
//!
//! Generic key/value store with per-entry time-to-live and substring-based
//! bulk invalidation. A single coarse mutex guards the map; every operation is
//! a short in-memory scan so contention stays low even while a sweep runs.
//!
//! Each invalidated prefix carries an epoch. A reader that computes a value
//! outside the lock takes the epoch first and stores with
//! [`CacheStore::set_if_current`], so a result computed before a concurrent
//! invalidation is never written back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::{self, Clock, SystemClock};

/// Default entry lifetime: 5 minutes
pub const DEFAULT_TTL: StdDuration = StdDuration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.inserted_at > self.ttl
    }
}

/// Point-in-time view of the cache for the monitoring facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub hits: u64,
    pub misses: u64,
}

/// In-memory TTL cache
pub struct CacheStore<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    /// Invalidation count per prefix; only locked while `entries` is held or alone
    epochs: Mutex<HashMap<String, u64>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> CacheStore<V> {
    /// Create a cache reading the wall clock
    pub fn new(default_ttl: StdDuration) -> Self {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(default_ttl: StdDuration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            epochs: Mutex::new(HashMap::new()),
            default_ttl: clock::span(default_ttl),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a live entry. An entry found expired is removed before returning `None`.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            entries.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "cache entry expired on read");
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert with the default TTL
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.insert(key.into(), value, self.default_ttl);
    }

    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: StdDuration) {
        self.insert(key.into(), value, clock::span(ttl));
    }

    fn insert(&self, key: String, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
            ttl,
        };
        self.entries.lock().insert(key, entry);
    }

    /// Current invalidation epoch of `prefix`
    pub fn epoch(&self, prefix: &str) -> u64 {
        self.epochs.lock().get(prefix).copied().unwrap_or(0)
    }

    /// Insert with the default TTL unless `prefix` was invalidated after
    /// `epoch` was read. Returns whether the value was stored.
    pub fn set_if_current(&self, key: impl Into<String>, value: V, prefix: &str, epoch: u64) -> bool {
        let mut entries = self.entries.lock();
        if self.epoch(prefix) != epoch {
            return false;
        }
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
            ttl: self.default_ttl,
        };
        entries.insert(key.into(), entry);
        true
    }

    /// Remove every entry whose key contains `prefix`. Returns the number removed.
    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.contains(prefix));
        *self.epochs.lock().entry(prefix.to_string()).or_insert(0) += 1;
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(prefix, removed, "invalidated cache entries");
        }
        removed
    }

    /// Remove every expired entry. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = self.entries.lock();
        let expired = entries.values().filter(|e| e.is_expired(now)).count();
        CacheStats {
            total: entries.len(),
            active: entries.len() - expired,
            expired,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache: CacheStore<String> = CacheStore::new(DEFAULT_TTL);
        cache.set_with_ttl("k", "v".to_string(), StdDuration::from_millis(100));

        assert_eq!(cache.get("k"), Some("v".to_string()));

        tokio::time::sleep(StdDuration::from_millis(150)).await;

        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().total, 0, "expired entry should be removed on read");
    }

    #[test]
    fn test_invalidate_by_prefix_scopes_to_subject() {
        let cache: CacheStore<u32> = CacheStore::new(DEFAULT_TTL);
        cache.set("user:42:a", 1);
        cache.set("user:42:b", 2);
        cache.set("user:42:c", 3);
        cache.set("user:99:a", 4);

        assert_eq!(cache.invalidate_by_prefix("user:42:"), 3);
        assert_eq!(cache.get("user:42:a"), None);
        assert_eq!(cache.get("user:99:a"), Some(4));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let clock = Arc::new(ManualClock::new());
        let cache: CacheStore<u32> = CacheStore::with_clock(StdDuration::from_secs(60), clock.clone());
        cache.set("short", 1);
        cache.set_with_ttl("long", 2, StdDuration::from_secs(600));

        clock.advance(Duration::seconds(61));

        let stats = cache.stats();
        assert_eq!((stats.total, stats.active, stats.expired), (2, 1, 1));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get("long"), Some(2));
        assert_eq!(cache.stats().total, 1);
    }

    #[test]
    fn test_entry_at_exact_ttl_is_still_live() {
        let clock = Arc::new(ManualClock::new());
        let cache: CacheStore<u32> = CacheStore::with_clock(StdDuration::from_secs(10), clock.clone());
        cache.set("k", 7);

        clock.advance(Duration::seconds(10));
        assert_eq!(cache.get("k"), Some(7));

        clock.advance(Duration::milliseconds(1));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache: CacheStore<u32> = CacheStore::new(DEFAULT_TTL);
        cache.set("k", 1);
        cache.get("k");
        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_invalidation_between_read_and_store_drops_stale_value() {
        let cache: CacheStore<Vec<u32>> = CacheStore::new(DEFAULT_TTL);
        let prefix = "time_entries:7:";

        // reader takes the epoch and computes its listing
        let epoch = cache.epoch(prefix);
        let stale = vec![];

        // a writer mutates and invalidates before the reader stores
        cache.invalidate_by_prefix(prefix);

        assert!(!cache.set_if_current("time_entries:7:list", stale, prefix, epoch));
        assert_eq!(cache.get("time_entries:7:list"), None);

        let fresh_epoch = cache.epoch(prefix);
        assert_eq!(fresh_epoch, epoch + 1);
        assert!(cache.set_if_current("time_entries:7:list", vec![1], prefix, fresh_epoch));
        assert_eq!(cache.get("time_entries:7:list"), Some(vec![1]));
    }

    #[test]
    fn test_other_prefix_invalidation_does_not_block_store() {
        let cache: CacheStore<u32> = CacheStore::new(DEFAULT_TTL);
        let epoch = cache.epoch("time_entries:1:");
        cache.invalidate_by_prefix("time_entries:2:");

        assert!(cache.set_if_current("time_entries:1:list", 5, "time_entries:1:", epoch));
    }
}
