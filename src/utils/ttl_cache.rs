//! TTL Cache with FIFO Capacity Eviction
//!
//! A small map whose entries silently expire after a fixed time-to-live. It
//! backs the resync request dedup sets (one request per id per TTL window)
//! and the block-breaking progress cache, where "breaking stopped" is simply
//! an entry that was not refreshed.
//!
//! Expired entries are purged lazily on mutation. When the cache is full the
//! oldest insertion is evicted in O(1) through an insertion-order queue.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    added_at: Instant,
    seq: u64,
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Insertion order. A record is stale when its key was refreshed later.
    insertion_order: VecDeque<(K, u64)>,
    next_seq: u64,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            next_seq: 0,
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    fn is_live(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.duration_since(entry.added_at) < self.ttl
    }

    /// Insert or refresh `key`. Returns the previous live value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let now = Instant::now();
        self.cleanup_expired(now);

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.remove_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.insertion_order.push_back((key.clone(), seq));
        self.entries
            .insert(
                key,
                CacheEntry {
                    value,
                    added_at: now,
                    seq,
                },
            )
            .map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| &entry.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        let entry = self.entries.remove(key)?;
        self.is_live(&entry, now).then_some(entry.value)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .values()
            .filter(|entry| self.is_live(entry, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.insertion_order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            ttl_ms: u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn cleanup_expired(&mut self, now: Instant) {
        let initial_count = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.added_at) < ttl);

        while let Some((key, seq)) = self.insertion_order.front() {
            let current = self.entries.get(key).map(|e| e.seq);
            if current == Some(*seq) {
                break;
            }
            self.insertion_order.pop_front();
        }

        let removed = initial_count - self.entries.len();
        if removed > 0 {
            debug!(removed, "Expired TTL cache entries");
        }
    }

    fn remove_oldest(&mut self) {
        while let Some((key, seq)) = self.insertion_order.pop_front() {
            let current = self.entries.get(&key).map(|e| e.seq);
            if current == Some(seq) {
                self.entries.remove(&key);
                debug!("Evicted oldest TTL cache entry due to size limit");
                return;
            }
        }
    }
}

impl<K> TtlCache<K, ()>
where
    K: Eq + Hash + Clone,
{
    /// Record `key` as seen. Returns true if it was not already live, i.e.
    /// the caller should act on it.
    pub fn mark(&mut self, key: K) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.insert(key, ());
        true
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_ms: u64,
}
