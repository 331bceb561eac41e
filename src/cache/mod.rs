//! Read cache for records served from SSTables.
//!
//! Provides an LRU (Least Recently Used) cache consulted after the MemTable
//! and before any on-disk level.

mod lru;

pub use lru::{CacheStats, RecordCache};
