//! LRU (Least Recently Used) cache of records.
//!
//! Sits between the MemTable and the on-disk levels. It is not authoritative:
//! a cached record may be a tombstone and callers must check before treating
//! a hit as a live value.

use crate::record::Record;
use std::collections::{HashMap, VecDeque};

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }

    /// Reset all statistics to zero
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Entry-count bounded LRU cache keyed by user key.
///
/// Uses a HashMap for O(1) lookups and a VecDeque for LRU order. Owned by
/// the engine and only touched under its lock.
#[derive(Debug)]
pub struct RecordCache {
    /// Maximum number of records
    capacity: usize,
    /// Cache entries stored by key
    entries: HashMap<String, Record>,
    /// LRU queue (most recently used at the back)
    lru_queue: VecDeque<String>,
    /// Cache statistics
    stats: CacheStats,
}

impl RecordCache {
    /// Create a cache holding at most `capacity` records. Zero disables caching.
    ///
    /// # Examples
    ///
    /// ```
    /// use lsmkv::cache::RecordCache;
    /// use lsmkv::record::Record;
    ///
    /// let mut cache = RecordCache::new(10);
    /// cache.insert(Record::new("k", b"v".to_vec(), 1));
    /// assert!(cache.contains("k"));
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    /// Get a record and mark it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&Record> {
        self.stats.lookups += 1;

        if self.entries.contains_key(key) {
            self.stats.hits += 1;
            self.touch(key);
            self.entries.get(key)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Whether `key` is cached. Does not affect LRU order or statistics.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert a record, evicting the least recently used entry if full.
    pub fn insert(&mut self, record: Record) {
        if self.capacity == 0 {
            return;
        }

        if self.entries.contains_key(&record.key) {
            self.touch(&record.key);
        } else {
            while self.entries.len() >= self.capacity {
                self.evict_one();
            }
            self.lru_queue.push_back(record.key.clone());
        }

        self.entries.insert(record.key.clone(), record);
        self.stats.insertions += 1;
    }

    /// Replace the cached record for `record.key` only if one is present.
    ///
    /// Keeps a cached value from going stale after an overwrite without
    /// letting writes push reads out of the cache.
    pub fn refresh(&mut self, record: &Record) {
        if let Some(entry) = self.entries.get_mut(&record.key) {
            *entry = record.clone();
        }
    }

    /// Mark a cached record as deleted. No-op for uncached keys.
    pub fn mark_deleted(&mut self, key: &str, timestamp: u64) {
        if let Some(entry) = self.entries.get_mut(key) {
            *entry = Record::tombstone(key, timestamp);
        }
    }

    /// Moves the key to the end of the LRU queue.
    ///
    /// # Performance Note
    ///
    /// This operation is O(n) due to linear search in VecDeque. Record caches
    /// are small, so this is acceptable.
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.lru_queue.iter().position(|k| k == key) {
            if let Some(k) = self.lru_queue.remove(pos) {
                self.lru_queue.push_back(k);
            }
        }
    }

    /// Evict the least recently used entry from the cache.
    fn evict_one(&mut self) {
        if let Some(key) = self.lru_queue.pop_front() {
            if self.entries.remove(&key).is_some() {
                self.stats.evictions += 1;
            }
        }
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Reset cache statistics to zero.
    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru_queue.clear();
    }

    /// Get the cache capacity in records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
