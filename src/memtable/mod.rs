//! # MemTable - In-Memory Sorted Table
//!
//! The MemTable is an in-memory data structure that stores recent writes
//! until they are flushed to a level-0 SSTable.
//!
//! ## Design
//!
//! - One MemTable type, two interchangeable backends behind [`OrderedStore`]:
//!   an arena skiplist (default) and a `BTreeMap`. The backend is picked at
//!   construction and never switched.
//! - Keys compare as plain byte strings, the same order SSTables use.
//! - A write only replaces an existing record if its timestamp is not older,
//!   so replaying the same WAL twice is harmless.
//! - Deletes store a tombstone, even for keys the table never held, so a
//!   delete consumes capacity like any other write.
//! - Capacity is counted in entries; `is_full` is checked by the caller after
//!   every mutation.

mod btree;
mod skiplist;

pub use btree::BTreeStore;
pub use skiplist::{SkipList, MAX_HEIGHT};

use crate::config::MemTableBackend;
use crate::record::Record;

/// Ordered key to record map backing a MemTable.
pub trait OrderedStore: Send {
    /// Look up the record stored for `key`.
    fn get(&self, key: &str) -> Option<&Record>;

    /// Insert or replace the record for `record.key`.
    fn put(&mut self, record: Record);

    /// Number of distinct keys.
    fn len(&self) -> usize;

    /// Clone every record in key order.
    fn sorted(&self) -> Vec<Record>;

    /// Take every record in key order, leaving the store empty.
    fn drain(&mut self) -> Vec<Record>;
}

/// MemTable stores recent writes in memory.
///
/// # Example
///
/// ```rust
/// use lsmkv::config::MemTableBackend;
/// use lsmkv::memtable::MemTable;
/// use lsmkv::record::Record;
///
/// let mut memtable = MemTable::new(20, MemTableBackend::SkipList, 32);
/// memtable.insert(Record::new("key", b"value".to_vec(), 1));
/// assert_eq!(memtable.find("key").unwrap().value, b"value");
/// ```
pub struct MemTable {
    store: Box<dyn OrderedStore>,
    capacity: usize,
}

impl MemTable {
    /// Creates an empty MemTable holding up to `capacity` entries.
    pub fn new(capacity: usize, backend: MemTableBackend, max_height: usize) -> Self {
        let store: Box<dyn OrderedStore> = match backend {
            MemTableBackend::SkipList => Box::new(SkipList::new(max_height)),
            MemTableBackend::BTree => Box::new(BTreeStore::new()),
        };
        Self { store, capacity }
    }

    /// Inserts a record.
    ///
    /// Returns false if a record with a newer timestamp is already present.
    pub fn insert(&mut self, record: Record) -> bool {
        if let Some(existing) = self.store.get(&record.key) {
            if existing.timestamp > record.timestamp {
                return false;
            }
        }
        self.store.put(record);
        true
    }

    /// Writes a tombstone for `key`.
    pub fn delete(&mut self, key: &str, timestamp: u64) -> bool {
        self.insert(Record::tombstone(key, timestamp))
    }

    /// Retrieves the record for a key, tombstones included.
    pub fn find(&self, key: &str) -> Option<&Record> {
        self.store.get(key)
    }

    /// Returns every record in key order and resets the table.
    pub fn flush(&mut self) -> Vec<Record> {
        self.store.drain()
    }

    /// Returns every record in key order without resetting.
    pub fn all_elements(&self) -> Vec<Record> {
        self.store.sorted()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if the MemTable is empty.
    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Returns true once the entry count has reached capacity.
    pub fn is_full(&self) -> bool {
        self.store.len() >= self.capacity
    }

    /// Configured capacity in entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
