//! In-process key/value cache with a fixed time-to-live.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub(crate) const NAME_SEARCH_TTL: Duration = Duration::from_secs(60 * 60 * 24);
pub(crate) const EVIDENCE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Stores `(value, timestamp)` pairs and treats an entry as absent once it is
/// `ttl` old or older.
#[derive(Debug)]
pub struct ExpiringCache<V> {
    ttl: Duration,
    entries: HashMap<String, CacheEntry<V>>,
}

impl<V: Clone> ExpiringCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&mut self, key: &str, now: Instant) -> Option<V> {
        let entry = self.entries.get(key)?;
        if now.saturating_duration_since(entry.stored_at) < self.ttl {
            return Some(entry.value.clone());
        }
        self.entries.remove(key);
        None
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Expired entries are swept on every insert, so the map only holds live keys.
    pub fn insert_at(&mut self, key: impl Into<String>, value: V, now: Instant) {
        self.purge_expired(now);
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// Drops every entry that has outlived the TTL and returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        if self.is_empty() {
            return 0;
        }
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_is_returned() {
        let mut cache = ExpiringCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        cache.insert_at("metformin", vec!["Metformin"], t0);

        assert_eq!(
            cache.get_at("metformin", t0 + Duration::from_secs(59)),
            Some(vec!["Metformin"])
        );
    }

    #[test]
    fn entry_expires_exactly_at_ttl() {
        let mut cache = ExpiringCache::new(Duration::from_secs(60));
        let t0 = Instant::now();
        cache.insert_at("aspirin", 3_u32, t0);

        assert_eq!(cache.get_at("aspirin", t0 + Duration::from_secs(60)), None);
        assert!(cache.is_empty(), "expired entry should be evicted on read");
    }

    #[test]
    fn reinsert_refreshes_timestamp() {
        let mut cache = ExpiringCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("q", 1_u8, t0);
        cache.insert_at("q", 2_u8, t0 + Duration::from_secs(8));

        assert_eq!(cache.get_at("q", t0 + Duration::from_secs(15)), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn purge_expired_keeps_live_entries() {
        let mut cache = ExpiringCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("old", 1_u8, t0);
        cache.insert_at("new", 2_u8, t0 + Duration::from_secs(9));

        let removed = cache.purge_expired(t0 + Duration::from_secs(12));
        assert_eq!(removed, 1);
        assert_eq!(cache.get_at("new", t0 + Duration::from_secs(12)), Some(2));
    }

    #[test]
    fn insert_sweeps_expired_entries() {
        let mut cache = ExpiringCache::new(Duration::from_secs(10));
        let t0 = Instant::now();
        cache.insert_at("old", 1_u8, t0);
        cache.insert_at("new", 2_u8, t0 + Duration::from_secs(11));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_key_is_none() {
        let mut cache: ExpiringCache<String> = ExpiringCache::new(NAME_SEARCH_TTL);
        assert_eq!(cache.get("nothing"), None);
    }
}
