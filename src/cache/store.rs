//! Content-addressed record of cached segments

use crate::analysis::{Fingerprint, SegmentKind};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest TTL the store will honour (one year)
pub const MAX_CACHE_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A segment marked cacheable at some point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub token_count: usize,
    pub segment_kind: SegmentKind,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Tracks cached fingerprints with a TTL.
///
/// Expired entries count as absent. They are dropped when looked up, swept,
/// or reached by an insert: every entry shares one TTL, so the oldest
/// insertion is always the first to expire. When bounded, the least
/// recently inserted entry makes room for a new one; lookups never change
/// that order.
pub struct CacheStore {
    entries: Mutex<LruCache<Fingerprint, CacheEntry>>,
    cache_duration: Duration,
}

impl CacheStore {
    /// Unbounded store
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            cache_duration: cache_duration.min(MAX_CACHE_DURATION),
        }
    }

    /// Store tracking at most `max_entries` fingerprints (0 = unbounded)
    pub fn bounded(cache_duration: Duration, max_entries: usize) -> Self {
        let entries = NonZeroUsize::new(max_entries)
            .map(LruCache::new)
            .unwrap_or_else(LruCache::unbounded);

        Self {
            entries: Mutex::new(entries),
            cache_duration: cache_duration.min(MAX_CACHE_DURATION),
        }
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    /// Live entry for `fingerprint`, if any
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.get_at(fingerprint, Instant::now())
    }

    pub(crate) fn get_at(&self, fingerprint: &Fingerprint, now: Instant) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();

        match entries.peek(fingerprint) {
            None => return None,
            Some(entry) if !entry.is_expired_at(now) => return Some(entry.clone()),
            Some(_) => {}
        }

        entries.pop(fingerprint);
        debug!("Evicted expired cache entry {}", fingerprint.short());
        None
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.get(fingerprint).is_some()
    }

    /// Insert or replace the entry for `fingerprint`
    pub fn put(
        &self,
        fingerprint: Fingerprint,
        token_count: usize,
        segment_kind: SegmentKind,
    ) -> CacheEntry {
        self.put_at(fingerprint, token_count, segment_kind, Instant::now())
    }

    pub(crate) fn put_at(
        &self,
        fingerprint: Fingerprint,
        token_count: usize,
        segment_kind: SegmentKind,
        now: Instant,
    ) -> CacheEntry {
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            token_count,
            segment_kind,
            created_at: now,
            expires_at: now + self.cache_duration,
        };

        let mut entries = self.entries.lock();

        let mut swept = 0;
        while entries.peek_lru().is_some_and(|(_, oldest)| oldest.is_expired_at(now)) {
            entries.pop_lru();
            swept += 1;
        }
        if swept > 0 {
            debug!("Evicted {} expired cache entries on insert", swept);
        }

        // A replaced entry counts as freshly inserted
        entries.pop(&fingerprint);
        if let Some((evicted, _)) = entries.push(fingerprint, entry.clone()) {
            debug!("Cache store full, dropped oldest entry {}", evicted.short());
        }

        entry
    }

    /// Drop every expired entry, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub(crate) fn evict_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();

        let expired: Vec<Fingerprint> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(fingerprint, _)| fingerprint.clone())
            .collect();

        for fingerprint in &expired {
            entries.pop(fingerprint);
        }

        if !expired.is_empty() {
            debug!("Evicted {} expired cache entries", expired.len());
        }
        expired.len()
    }

    /// Explicitly evict one entry
    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.entries.lock().pop(fingerprint)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of tracked entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total tokens across tracked entries
    pub fn total_cached_tokens(&self) -> usize {
        self.entries.lock().iter().map(|(_, entry)| entry.token_count).sum()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Content;
    use std::sync::Arc;

    fn fp(text: &str) -> Fingerprint {
        Fingerprint::of(&Content::from(text))
    }

    #[test]
    fn test_put_then_get() {
        let store = CacheStore::new(Duration::from_secs(60));
        let entry = store.put(fp("a"), 100, SegmentKind::System);

        assert_eq!(entry.expires_at - entry.created_at, Duration::from_secs(60));
        let found = store.get(&fp("a")).expect("entry should be live");
        assert_eq!(found.token_count, 100);
        assert_eq!(found.segment_kind, SegmentKind::System);
        assert!(store.get(&fp("b")).is_none());
    }

    #[test]
    fn test_expired_lookup_evicts() {
        let store = CacheStore::new(Duration::from_secs(60));
        let now = Instant::now();
        store.put_at(fp("a"), 100, SegmentKind::Message, now);

        assert!(store.get_at(&fp("a"), now + Duration::from_secs(59)).is_some());
        assert!(store.get_at(&fp("a"), now + Duration::from_secs(60)).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_zero_duration_expires_immediately() {
        let store = CacheStore::new(Duration::ZERO);
        store.put(fp("a"), 10, SegmentKind::Message);
        assert!(store.get(&fp("a")).is_none());
    }

    #[test]
    fn test_replace_resets_expiry() {
        let store = CacheStore::new(Duration::from_secs(60));
        let now = Instant::now();
        store.put_at(fp("a"), 100, SegmentKind::Message, now);
        store.put_at(fp("a"), 120, SegmentKind::Message, now + Duration::from_secs(30));

        assert_eq!(store.len(), 1);
        let entry = store.get_at(&fp("a"), now + Duration::from_secs(80)).unwrap();
        assert_eq!(entry.token_count, 120);
    }

    #[test]
    fn test_evict_expired_sweep() {
        let store = CacheStore::new(Duration::from_secs(60));
        let now = Instant::now();
        store.put_at(fp("old-1"), 1, SegmentKind::Message, now);
        store.put_at(fp("old-2"), 1, SegmentKind::Message, now);
        store.put_at(fp("new"), 1, SegmentKind::Message, now + Duration::from_secs(50));

        assert_eq!(store.evict_expired_at(now + Duration::from_secs(70)), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.evict_expired_at(now + Duration::from_secs(70)), 0);
    }

    #[test]
    fn test_insert_sweeps_expired_entries() {
        let store = CacheStore::new(Duration::from_secs(60));
        let now = Instant::now();
        for i in 0..100 {
            store.put_at(fp(&i.to_string()), 1, SegmentKind::System, now);
        }
        store.put_at(fp("late"), 1, SegmentKind::System, now + Duration::from_secs(30));
        assert_eq!(store.len(), 101);

        store.put_at(fp("later"), 1, SegmentKind::System, now + Duration::from_secs(61));
        assert_eq!(store.len(), 2);
        assert!(store.contains(&fp("later")));
        assert!(store.get_at(&fp("late"), now + Duration::from_secs(61)).is_some());
    }

    #[test]
    fn test_zero_duration_store_stays_small() {
        let store = CacheStore::new(Duration::ZERO);
        for i in 0..500 {
            store.put(fp(&i.to_string()), 1, SegmentKind::System);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_bounded_drops_least_recently_inserted() {
        let store = CacheStore::bounded(Duration::from_secs(60), 2);
        store.put(fp("a"), 1, SegmentKind::Message);
        store.put(fp("b"), 1, SegmentKind::Message);

        // Lookups do not refresh insertion order
        assert!(store.get(&fp("a")).is_some());
        store.put(fp("c"), 1, SegmentKind::Message);

        assert!(store.get(&fp("a")).is_none());
        assert!(store.contains(&fp("b")));
        assert!(store.contains(&fp("c")));
    }

    #[test]
    fn test_bounded_zero_is_unbounded() {
        let store = CacheStore::bounded(Duration::from_secs(60), 0);
        for i in 0..50 {
            store.put(fp(&i.to_string()), 1, SegmentKind::Message);
        }
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_remove_and_clear() {
        let store = CacheStore::default();
        store.put(fp("a"), 7, SegmentKind::ToolDefinitions);
        store.put(fp("b"), 3, SegmentKind::ToolDefinitions);
        assert_eq!(store.total_cached_tokens(), 10);

        assert_eq!(store.remove(&fp("a")).map(|e| e.token_count), Some(7));
        assert!(store.remove(&fp("a")).is_none());

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_huge_duration_is_capped() {
        let store = CacheStore::new(Duration::from_secs(u64::MAX));
        assert_eq!(store.cache_duration(), MAX_CACHE_DURATION);
        store.put(fp("a"), 1, SegmentKind::System);
        assert!(store.contains(&fp("a")));
    }

    #[test]
    fn test_concurrent_puts_keep_one_entry() {
        let store = Arc::new(CacheStore::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.put(fp("shared"), i, SegmentKind::System);
                        assert!(store.get(&fp("shared")).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 1);
    }
}
