//! Time-to-live cache in front of the data manager
//!
//! Entries expire after `ttl` without access. Expiry is lazy: a stale entry
//! is dropped by the lookup that finds it, or by an explicit [`TtlCache::purge`].

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.last_access) > ttl
    }
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns a copy of the cached value and refreshes its access time.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let ttl = self.ttl;

        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(ttl, now))
            .is_some()
        {
            return None;
        }

        self.entries.get_mut(key).map(|mut entry| {
            entry.last_access = now;
            entry.value.clone()
        })
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                last_access: Instant::now(),
            },
        );
    }

    /// Removes and returns the live entry if `predicate` accepts it. When
    /// several callers race for the same entry only one gets it.
    pub fn take_if<F>(&self, key: &K, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        let now = Instant::now();
        let ttl = self.ttl;
        self.entries
            .remove_if(key, |_, entry| {
                !entry.is_expired(ttl, now) && predicate(&entry.value)
            })
            .map(|(_, entry)| entry.value)
    }

    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(self.ttl, now))
            .unwrap_or(false)
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(self.ttl, now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
