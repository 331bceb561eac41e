//! `BTreeMap`-backed ordered store.

use super::OrderedStore;
use crate::record::Record;
use std::collections::BTreeMap;

/// Ordered tree alternative to the skiplist.
#[derive(Debug, Default)]
pub struct BTreeStore {
    map: BTreeMap<String, Record>,
}

impl BTreeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl OrderedStore for BTreeStore {
    fn get(&self, key: &str) -> Option<&Record> {
        self.map.get(key)
    }

    fn put(&mut self, record: Record) {
        self.map.insert(record.key.clone(), record);
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn sorted(&self) -> Vec<Record> {
        self.map.values().cloned().collect()
    }

    fn drain(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.map).into_values().collect()
    }
}
