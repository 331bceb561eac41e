//! Configuration options for the lsmkv storage engine.
//!
//! Capacities are expressed in records (entries), not bytes.

use serde::{Deserialize, Serialize};

/// Configuration options for opening a database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Create the database if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Maximum number of records per WAL segment file.
    /// Default: 20
    pub wal_segment_capacity: usize,

    /// Sync WAL writes to disk after every append.
    /// Default: true
    pub sync_wal: bool,

    /// Number of entries at which the MemTable is flushed to level 0.
    /// Default: 20
    pub memtable_capacity: usize,

    /// Ordered structure backing the MemTable.
    /// Default: MemTableBackend::SkipList
    pub memtable_backend: MemTableBackend,

    /// Maximum tower height of the skiplist backend (at most 32).
    /// Default: 32
    pub skiplist_max_height: usize,

    /// Every n-th index entry is sampled into the Summary.
    /// Default: 3
    pub summary_stride: usize,

    /// Number of records held by the read cache.
    /// Set to 0 to disable caching.
    /// Default: 10
    pub cache_capacity: usize,

    /// Number of levels (level 0 through levels - 1).
    /// Default: 4
    pub levels: usize,

    /// Physical layout of SSTable components.
    /// Default: SSTableLayout::Many
    pub sstable_layout: SSTableLayout,

    /// Bloom filter false positive rate.
    /// Default: 0.01 (1%)
    pub bloom_filter_fp_rate: f64,

    /// Compaction policy.
    /// Default: CompactionStrategy::SizeTiered
    pub compaction: CompactionStrategy,

    /// Table count at which size-tiered compaction folds a level.
    /// Default: 5
    pub max_tables_per_level: usize,

    /// Leveled compaction: maximum table count per level, indexed by level.
    /// Levels without an entry never compact.
    /// Default: [4, 10, 100]
    pub leveled_table_limits: Vec<usize>,

    /// Leveled compaction: records per output table.
    /// Default: 10
    pub sstable_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            wal_segment_capacity: 20,
            sync_wal: true,
            memtable_capacity: 20,
            memtable_backend: MemTableBackend::SkipList,
            skiplist_max_height: 32,
            summary_stride: 3,
            cache_capacity: 10,
            levels: 4,
            sstable_layout: SSTableLayout::Many,
            bloom_filter_fp_rate: 0.01,
            compaction: CompactionStrategy::SizeTiered,
            max_tables_per_level: 5,
            leveled_table_limits: vec![4, 10, 100],
            sstable_size: 10,
        }
    }
}

/// MemTable backends. Selected once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemTableBackend {
    /// Arena-backed probabilistic skiplist.
    #[default]
    SkipList,
    /// `BTreeMap`-backed ordered tree.
    BTree,
}

/// Physical layout of an SSTable on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SSTableLayout {
    /// One file per component plus a TOC.
    #[default]
    Many,
    /// Every component concatenated into the Data file, located by a trailer.
    Single,
}

/// Compaction policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStrategy {
    /// Fold the two oldest tables of a level until one table moves down.
    #[default]
    SizeTiered,
    /// Key-range aware merges into fixed-size, disjoint tables.
    Leveled,
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the WAL segment capacity.
    pub fn wal_segment_capacity(mut self, records: usize) -> Self {
        self.wal_segment_capacity = records;
        self
    }

    /// Sets whether WAL appends are fsynced.
    pub fn sync_wal(mut self, value: bool) -> Self {
        self.sync_wal = value;
        self
    }

    /// Sets the MemTable flush threshold.
    pub fn memtable_capacity(mut self, entries: usize) -> Self {
        self.memtable_capacity = entries;
        self
    }

    /// Sets the MemTable backend.
    pub fn memtable_backend(mut self, backend: MemTableBackend) -> Self {
        self.memtable_backend = backend;
        self
    }

    /// Sets the tallest skiplist tower (1 to 32).
    pub fn skiplist_max_height(mut self, height: usize) -> Self {
        self.skiplist_max_height = height;
        self
    }

    /// Sets the Summary sampling stride.
    pub fn summary_stride(mut self, stride: usize) -> Self {
        self.summary_stride = stride;
        self
    }

    /// Sets the read cache capacity.
    pub fn cache_capacity(mut self, records: usize) -> Self {
        self.cache_capacity = records;
        self
    }

    /// Sets the number of levels.
    pub fn levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        self
    }

    /// Sets the SSTable layout.
    pub fn sstable_layout(mut self, layout: SSTableLayout) -> Self {
        self.sstable_layout = layout;
        self
    }

    /// Sets the Bloom filter false positive rate of new tables.
    pub fn bloom_filter_fp_rate(mut self, rate: f64) -> Self {
        self.bloom_filter_fp_rate = rate;
        self
    }

    /// Sets the compaction strategy.
    pub fn compaction(mut self, strategy: CompactionStrategy) -> Self {
        self.compaction = strategy;
        self
    }

    /// Sets the size-tiered table threshold.
    pub fn max_tables_per_level(mut self, tables: usize) -> Self {
        self.max_tables_per_level = tables;
        self
    }

    /// Sets the leveled per-level table limits.
    pub fn leveled_table_limits(mut self, limits: Vec<usize>) -> Self {
        self.leveled_table_limits = limits;
        self
    }

    /// Sets the number of records per leveled output table.
    pub fn sstable_size(mut self, records: usize) -> Self {
        self.sstable_size = records;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.wal_segment_capacity == 0 {
            return Err(crate::Error::invalid_argument("wal_segment_capacity must be > 0"));
        }
        if self.memtable_capacity == 0 {
            return Err(crate::Error::invalid_argument("memtable_capacity must be > 0"));
        }
        if self.skiplist_max_height == 0 || self.skiplist_max_height > 32 {
            return Err(crate::Error::invalid_argument(
                "skiplist_max_height must be between 1 and 32",
            ));
        }
        if self.summary_stride == 0 {
            return Err(crate::Error::invalid_argument("summary_stride must be > 0"));
        }
        if self.levels == 0 {
            return Err(crate::Error::invalid_argument("levels must be > 0"));
        }
        if self.bloom_filter_fp_rate <= 0.0 || self.bloom_filter_fp_rate >= 1.0 {
            return Err(crate::Error::invalid_argument(
                "bloom_filter_fp_rate must be between 0 and 1",
            ));
        }
        if self.max_tables_per_level < 2 {
            return Err(crate::Error::invalid_argument("max_tables_per_level must be >= 2"));
        }
        if self.sstable_size == 0 {
            return Err(crate::Error::invalid_argument("sstable_size must be > 0"));
        }
        Ok(())
    }
}
