//! # lsmkv - An Embedded LSM-Tree Key-Value Engine
//!
//! lsmkv stores string keys and opaque byte values using the Log-Structured
//! Merge-Tree architecture: writes are logged, buffered in memory and flushed
//! as immutable sorted tables that compaction folds into deeper levels.
//!
//! ## Architecture
//!
//! The storage engine consists of several key components:
//!
//! - **WAL (Write-Ahead Log)**: Segmented log making every write durable
//! - **MemTable**: In-memory sorted buffer (skiplist or B-tree)
//! - **Cache**: LRU cache of records read from disk
//! - **SSTable**: Immutable sorted tables with Index, Summary, Bloom filter
//!   and Merkle root components
//! - **Compaction**: Size-tiered or leveled folding of level N into N+1
//!
//! ## On-disk layout
//!
//! ```text
//! <path>/wal/log_<n>.bin
//! <path>/usertables/usertable-L<level>-<seq>-<Component>
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use lsmkv::{DB, Options};
//!
//! # fn main() -> Result<(), lsmkv::Error> {
//! // Open or create a database
//! let db = DB::open("./data", Options::default())?;
//!
//! // Write operations
//! db.put("user:1", b"alice")?;
//! db.put("user:2", b"bob")?;
//!
//! // Read operations
//! if let Some(value) = db.get("user:1")? {
//!     println!("Found: {:?}", value);
//! }
//!
//! // Scans are paginated, pages start at 1
//! let users = db.prefix_scan("user:", 10, 1)?;
//! assert_eq!(users.len(), 2);
//!
//! // Delete operations
//! db.delete("user:1")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cache;
pub mod compaction;
pub mod config;
pub mod error;
pub mod filter;
pub mod memtable;
pub mod policy;
pub mod record;
pub mod sstable;
pub mod wal;

// Re-exports
pub use config::Options;
pub use error::{Error, Result};

use cache::{CacheStats, RecordCache};
use compaction::Compactor;
use memtable::MemTable;
use parking_lot::Mutex;
use policy::{KeyPolicy, RateLimiter, ReservedPrefixes, Unlimited};
use record::{Clock, Record};
use sstable::{create_sstable, list_level, SSTableReader, TableId, TableOptions};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use wal::Wal;

/// Subdirectory holding the WAL segments.
pub const WAL_DIR: &str = "wal";

/// Subdirectory holding the SSTables.
pub const TABLE_DIR: &str = "usertables";

/// The main database handle.
///
/// Supports point reads and writes plus paginated prefix and range scans.
///
/// # Thread Safety
///
/// `DB` can be shared across threads using `Arc<DB>`. Every operation runs
/// under a single lock covering the WAL, MemTable, cache, flush and
/// compaction.
pub struct DB {
    /// Database directory path
    path: PathBuf,

    /// Configuration options
    options: Options,

    /// Everything mutable
    inner: Mutex<Inner>,
}

struct Inner {
    wal: Wal,
    memtable: MemTable,
    cache: RecordCache,
    compactor: Compactor,
    table_dir: PathBuf,
    table_options: TableOptions,
    levels: usize,
    clock: Clock,
    rate_limiter: Box<dyn RateLimiter>,
    key_policy: Box<dyn KeyPolicy>,
    closed: bool,
}

impl DB {
    /// Opens a database at the specified path with the given options.
    ///
    /// No rate limit is applied and the default reserved key prefixes are
    /// hidden from scans.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid
    /// - The path does not exist and `create_if_missing` is false
    /// - The WAL or table directory cannot be read or written
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use lsmkv::{DB, Options};
    ///
    /// # fn main() -> Result<(), lsmkv::Error> {
    /// let options = Options::default().memtable_capacity(100);
    /// let db = DB::open("./my_database", options)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        Self::open_with(path, options, Box::new(Unlimited), Box::new(ReservedPrefixes::default()))
    }

    /// Opens a database with a host-provided rate limiter and key policy.
    ///
    /// Recovery happens here: orphaned table files are swept, then the WAL
    /// is replayed into the MemTable, flushing whenever it fills up.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        options: Options,
        rate_limiter: Box<dyn RateLimiter>,
        key_policy: Box<dyn KeyPolicy>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Validate options
        options.validate()?;

        // Step 1: Create directories if not exist
        if !path.exists() {
            if options.create_if_missing {
                std::fs::create_dir_all(&path)?;
            } else {
                return Err(Error::NotFound(format!(
                    "Database directory does not exist: {:?}",
                    path
                )));
            }
        }
        let table_dir = path.join(TABLE_DIR);
        std::fs::create_dir_all(&table_dir)?;

        // Step 2: Remove half-written tables left by a crash
        let swept = sstable::sweep_orphans(&table_dir)?;
        if swept > 0 {
            log::warn!("Removed {} orphaned table files from {:?}", swept, table_dir);
        }

        // Step 3: Open the WAL and the in-memory structures
        let wal = Wal::open(path.join(WAL_DIR), options.wal_segment_capacity, options.sync_wal)?;
        let mut inner = Inner {
            wal,
            memtable: MemTable::new(
                options.memtable_capacity,
                options.memtable_backend,
                options.skiplist_max_height,
            ),
            cache: RecordCache::new(options.cache_capacity),
            compactor: Compactor::new(&table_dir, &options),
            table_dir,
            table_options: TableOptions::from(&options),
            levels: options.levels,
            clock: Clock::default(),
            rate_limiter,
            key_policy,
            closed: false,
        };

        // Step 4: New writes must sort after everything on disk, then replay the WAL
        inner.seed_clock()?;
        inner.recover()?;

        log::info!("Opened database at {:?} ({} records in MemTable)", path, inner.memtable.len());
        Ok(Self { path, options, inner: Mutex::new(inner) })
    }

    /// Database directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options the database was opened with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Inserts or overwrites a key.
    ///
    /// Returns `Ok(false)` if the rate limiter refused the write or the WAL
    /// append failed; nothing is changed in either case. A write that fills
    /// the MemTable flushes it and runs compaction before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting flush or compaction fails.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use lsmkv::{DB, Options};
    /// # fn main() -> Result<(), lsmkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// assert!(db.put("key", b"value")?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn put(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if !inner.rate_limiter.check_and_consume_token() {
            log::debug!("Rate limiter refused put of {:?}", key);
            return Ok(false);
        }

        let record = Record::new(key, value, inner.clock.now());
        inner.write(record)
    }

    /// Deletes a key by writing a tombstone.
    ///
    /// Returns `Ok(false)` under the same conditions as [`DB::put`]. The data
    /// itself is removed during compaction.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if !inner.rate_limiter.check_and_consume_token() {
            log::debug!("Rate limiter refused delete of {:?}", key);
            return Ok(false);
        }

        let record = Record::tombstone(key, inner.clock.now());
        inner.write(record)
    }

    /// Retrieves the value associated with a key.
    ///
    /// Looks in the MemTable, then the cache, then every level from the
    /// newest table to the oldest, stopping at the first record found.
    /// Returns `None` if the key is absent, deleted, or the rate limiter
    /// refused the read.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be read or fails its CRC check.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use lsmkv::{DB, Options};
    /// # fn main() -> Result<(), lsmkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// if let Some(value) = db.get("key")? {
    ///     println!("Found: {:?}", value);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if !inner.rate_limiter.check_and_consume_token() {
            log::debug!("Rate limiter refused get of {:?}", key);
            return Ok(None);
        }

        // Step 1: MemTable
        if let Some(record) = inner.memtable.find(key) {
            return Ok(record.live_value().map(<[u8]>::to_vec));
        }

        // Step 2: Cache
        if let Some(record) = inner.cache.get(key) {
            return Ok(record.live_value().map(<[u8]>::to_vec));
        }

        // Step 3: Levels, newest table first
        for level in 0..inner.levels {
            for id in list_level(&inner.table_dir, level)? {
                let table = SSTableReader::open(&inner.table_dir, id)?;
                if let Some(record) = table.get(key)? {
                    log::debug!("Found {:?} in table {}", key, id);
                    let value = record.live_value().map(<[u8]>::to_vec);
                    if !record.tombstone {
                        inner.cache.insert(record);
                    }
                    return Ok(value);
                }
            }
        }

        Ok(None)
    }

    /// Values of live, non-reserved keys starting with `prefix`, in key
    /// order, windowed to page `page_number` (1-based) of `page_size`.
    pub fn prefix_scan(
        &self,
        prefix: &str,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Vec<u8>>> {
        self.scan(
            page_size,
            page_number,
            |key| key.starts_with(prefix),
            |table| table.prefix_scan(prefix),
        )
    }

    /// Values of live, non-reserved keys in `[start, stop]`, in key order,
    /// windowed to page `page_number` (1-based) of `page_size`.
    pub fn range_scan(
        &self,
        start: &str,
        stop: &str,
        page_size: usize,
        page_number: usize,
    ) -> Result<Vec<Vec<u8>>> {
        self.scan(
            page_size,
            page_number,
            |key| start <= key && key <= stop,
            |table| table.range_scan(start, stop),
        )
    }

    /// Shared scan: the newest sighting of each key wins, then tombstones
    /// and reserved keys are dropped and the result is paginated.
    fn scan<M, T>(
        &self,
        page_size: usize,
        page_number: usize,
        matches: M,
        table_scan: T,
    ) -> Result<Vec<Vec<u8>>>
    where
        M: Fn(&str) -> bool,
        T: Fn(&SSTableReader) -> Result<Vec<Record>>,
    {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if !inner.rate_limiter.check_and_consume_token() {
            log::debug!("Rate limiter refused scan");
            return Ok(Vec::new());
        }
        if page_size == 0 || page_number == 0 {
            return Ok(Vec::new());
        }

        let mut newest: BTreeMap<String, Record> = BTreeMap::new();
        for record in inner.memtable.all_elements() {
            if matches(&record.key) {
                newest.insert(record.key.clone(), record);
            }
        }
        for level in 0..inner.levels {
            for id in list_level(&inner.table_dir, level)? {
                let table = SSTableReader::open(&inner.table_dir, id)?;
                for record in table_scan(&table)? {
                    newest.entry(record.key.clone()).or_insert(record);
                }
            }
        }

        let skip = (page_number - 1).saturating_mul(page_size);
        Ok(newest
            .into_values()
            .filter(|record| !record.tombstone && !inner.key_policy.is_reserved(&record.key))
            .skip(skip)
            .take(page_size)
            .map(|record| record.value)
            .collect())
    }

    /// Flushes the MemTable to a level-0 table, empties the WAL and runs
    /// compaction. Does nothing when the MemTable is empty.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use lsmkv::{DB, Options};
    /// # fn main() -> Result<(), lsmkv::Error> {
    /// # let db = DB::open("./data", Options::default())?;
    /// db.put("key", b"value")?;
    /// db.flush()?; // Manually flush to disk
    /// # Ok(())
    /// # }
    /// ```
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.flush().map(|_| ())
    }

    /// Runs compaction over every level.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.compactor.run().map(|_| ())
    }

    /// Recomputes the Merkle root of every table and compares it with the
    /// stored one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntegrityMismatch`] or [`Error::ChecksumMismatch`]
    /// for the first damaged table.
    pub fn verify_integrity(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        let mut checked = 0;
        for level in 0..inner.levels {
            for id in list_level(&inner.table_dir, level)? {
                SSTableReader::open(&inner.table_dir, id)?.verify_integrity()?;
                checked += 1;
            }
        }
        log::info!("Verified {} tables", checked);
        Ok(())
    }

    /// Committed tables per level, newest first within each level.
    pub fn level_tables(&self) -> Result<Vec<Vec<TableId>>> {
        let inner = self.inner.lock();
        (0..inner.levels).map(|level| list_level(&inner.table_dir, level)).collect()
    }

    /// Number of entries buffered in the MemTable.
    pub fn memtable_len(&self) -> usize {
        self.inner.lock().memtable.len()
    }

    /// Read cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.lock().cache.stats()
    }

    /// Closes the database, flushing the MemTable and syncing the WAL.
    ///
    /// Every later operation fails with [`Error::InvalidState`]. Closing
    /// twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }

        inner.flush()?;
        inner.wal.sync()?;
        inner.closed = true;

        log::info!("Database closed successfully");
        Ok(())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        // The WAL already holds everything the MemTable does.
        let inner = self.inner.get_mut();
        if !inner.closed {
            if let Err(e) = inner.wal.sync() {
                log::error!("Error syncing WAL during drop: {}", e);
            }
        }
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::invalid_state("Database is closed"));
        }
        Ok(())
    }

    /// Log, apply and maybe flush one write.
    fn write(&mut self, record: Record) -> Result<bool> {
        if let Err(e) = self.wal.append(&record) {
            log::error!("WAL append for {:?} failed: {}", record.key, e);
            return Ok(false);
        }

        if record.tombstone {
            self.cache.mark_deleted(&record.key, record.timestamp);
        } else {
            self.cache.refresh(&record);
        }
        self.memtable.insert(record);

        if self.memtable.is_full() {
            log::info!(
                "MemTable is full ({} >= {} entries), flushing",
                self.memtable.len(),
                self.memtable.capacity()
            );
            self.flush()?;
        }
        Ok(true)
    }

    /// Write the MemTable as a level-0 table, then retire the WAL and
    /// compact.
    fn flush(&mut self) -> Result<Option<TableId>> {
        let id = self.write_level_zero()?;
        if id.is_some() {
            self.wal.empty_log()?;
            self.compactor.run()?;
        }
        Ok(id)
    }

    /// The MemTable is only reset once its table is committed.
    fn write_level_zero(&mut self) -> Result<Option<TableId>> {
        if self.memtable.is_empty() {
            return Ok(None);
        }

        let records = self.memtable.all_elements();
        let id = create_sstable(&records, &self.table_dir, 0, self.table_options)?;
        self.memtable.flush();

        if let Some(id) = id {
            log::info!("Flushed {} records to table {}", records.len(), id);
        }
        Ok(id)
    }

    /// Raise the clock to the newest timestamp held by any table.
    fn seed_clock(&mut self) -> Result<()> {
        for level in 0..self.levels {
            for id in list_level(&self.table_dir, level)? {
                for record in SSTableReader::open(&self.table_dir, id)?.iter()? {
                    self.clock.observe(record?.timestamp);
                }
            }
        }
        Ok(())
    }

    /// Replay the WAL into the MemTable.
    ///
    /// Flushes during replay retire records that are still in the log, so
    /// in that case (or after a torn tail) the log is rewritten from what
    /// the MemTable still holds.
    fn recover(&mut self) -> Result<()> {
        let replay = self.wal.replay()?;
        let replayed = replay.records.len();
        let mut flushed = false;

        for record in replay.records {
            self.clock.observe(record.timestamp);
            self.memtable.insert(record);
            if self.memtable.is_full() {
                self.write_level_zero()?;
                self.compactor.run()?;
                flushed = true;
            }
        }

        if flushed || !replay.clean {
            self.wal.rewrite(&self.memtable.all_elements())?;
            log::info!(
                "WAL rewritten after replay ({} replayed, {} kept, clean: {})",
                replayed,
                self.memtable.len(),
                replay.clean
            );
        } else if replayed > 0 {
            log::info!("Replayed {} WAL records", replayed);
        }
        Ok(())
    }
}
