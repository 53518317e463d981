//! Bounded TTL cache with least-recently-used eviction.
//!
//! Entries live in an insertion-ordered map; a hit moves the entry to the back,
//! so the front is always the least recently accessed key.
use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) < self.ttl
    }
}

#[derive(Debug)]
pub struct TtlCache<V> {
    capacity: usize,
    entries: Mutex<IndexMap<String, CacheEntry<V>>>,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached value unless its TTL has elapsed (expired entries are dropped).
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        let entry = entries.shift_remove(key)?;
        if !entry.is_live(Instant::now()) {
            return None;
        }
        let value = entry.value.clone();
        entries.insert(key.to_string(), entry);
        Some(value)
    }

    /// Insert or overwrite `key`. A zero TTL stores nothing.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut entries = self.lock();
        entries.shift_remove(&key);
        if ttl.is_zero() {
            return;
        }
        if entries.len() >= self.capacity {
            let now = Instant::now();
            entries.retain(|_, e| e.is_live(now));
        }
        while entries.len() >= self.capacity {
            if entries.shift_remove_index(0).is_none() {
                break;
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including ones that expired but were not looked up yet.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn value_visible_until_ttl_elapses() {
        let cache = TtlCache::new(4);
        cache.set("k", 7u32, Duration::from_secs(10));

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_eq!(cache.get("k"), Some(7));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty(), "expired entry is evicted on lookup");
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_accessed_not_oldest_inserted() {
        let cache = TtlCache::new(2);
        cache.set("a", 1, Duration::from_secs(60));
        cache.set("b", 2, Duration::from_secs(60));

        // touch "a" so "b" becomes the LRU entry
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c", 3, Duration::from_secs(60));

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_purged_before_evicting_live_ones() {
        let cache = TtlCache::new(2);
        cache.set("short", 1, Duration::from_secs(1));
        cache.set("long", 2, Duration::from_secs(60));
        assert_eq!(cache.get("short"), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set("new", 3, Duration::from_secs(60));

        assert_eq!(cache.get("long"), Some(2));
        assert_eq!(cache.get("new"), Some(3));
    }

    #[test]
    fn overwrite_and_clear() {
        let cache = TtlCache::new(3);
        cache.set("k", "old".to_string(), Duration::from_secs(60));
        cache.set("k", "new".to_string(), Duration::from_secs(60));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k").as_deref(), Some("new"));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn zero_ttl_is_not_stored() {
        let cache = TtlCache::new(3);
        cache.set("k", 1, Duration::ZERO);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_writers_keep_bookkeeping_consistent() {
        let cache = std::sync::Arc::new(TtlCache::new(16));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("{t}-{i}");
                        cache.set(key.clone(), i, Duration::from_secs(60));
                        let _ = cache.get(&key);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("writer thread panicked");
        }
        assert_eq!(cache.len(), 16);
    }
}
