//! Compaction module for managing SSTable compaction.
//!
//! Compaction folds the tables of level N into level N+1 so level sizes
//! stay bounded and overwritten or deleted data is eventually reclaimed.
//!
//! ## Strategies
//!
//! - **Size-tiered** ([`size_tiered`]): once a level holds
//!   `max_tables_per_level` tables, all of them are folded oldest first into
//!   a single table on the next level.
//! - **Leveled** ([`leveled`]): once a level holds more tables than its limit,
//!   its tables are merged with the overlapping tables of the next level and
//!   re-split into fixed-size, key-disjoint tables.
//!
//! ## Process
//!
//! 1. Pick input tables from the directory listing
//! 2. Merge them with [`MergeIterator`] (greatest timestamp wins)
//! 3. Write the output tables through the regular SSTable builder
//! 4. Delete the inputs, only after every output is committed
//!
//! Both strategies are idempotent: each run re-reads the directory and does
//! nothing when no level is over its threshold. The last level never
//! compacts. Filesystem errors abort the run and are returned to the caller.

pub mod leveled;
pub mod merge;
pub mod size_tiered;

pub use merge::{MergeIterator, RecordStream};

use crate::config::{CompactionStrategy, Options};
use crate::error::Result;
use crate::record::Record;
use crate::sstable::{delete_table, list_level, SSTableBuilder, SSTableReader, TableId, TableOptions};
use std::path::{Path, PathBuf};

/// Runs the configured compaction policy over a table directory.
#[derive(Debug, Clone)]
pub struct Compactor {
    dir: PathBuf,
    strategy: CompactionStrategy,
    levels: usize,
    max_tables_per_level: usize,
    leveled_table_limits: Vec<usize>,
    sstable_size: usize,
    table_options: TableOptions,
}

impl Compactor {
    /// Create a compactor for the tables in `dir`.
    pub fn new(dir: impl Into<PathBuf>, options: &Options) -> Self {
        Self {
            dir: dir.into(),
            strategy: options.compaction,
            levels: options.levels,
            max_tables_per_level: options.max_tables_per_level,
            leveled_table_limits: options.leveled_table_limits.clone(),
            sstable_size: options.sstable_size,
            table_options: TableOptions::from(options),
        }
    }

    /// Table directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Compact every level once, in level order.
    ///
    /// Returns the number of merge passes performed.
    pub fn run(&self) -> Result<usize> {
        let mut passes = 0;
        for level in 0..self.levels {
            passes += self.compact_level(level)?;
        }
        if passes > 0 {
            log::info!("Compaction finished: {} passes ({:?})", passes, self.strategy);
        }
        Ok(passes)
    }

    /// Compact one level if it is over its threshold.
    pub fn compact_level(&self, level: usize) -> Result<usize> {
        if level + 1 >= self.levels {
            return Ok(0);
        }
        match self.strategy {
            CompactionStrategy::SizeTiered => size_tiered::compact_level(self, level),
            CompactionStrategy::Leveled => leveled::compact_level(self, level),
        }
    }

    fn is_bottom(&self, level: usize) -> bool {
        level + 1 == self.levels
    }

    fn open(&self, id: TableId) -> Result<SSTableReader> {
        SSTableReader::open(&self.dir, id)
    }

    /// Tables of `level` whose key range intersects `[lo, hi]`, newest first.
    fn overlapping(&self, level: usize, lo: &str, hi: &str) -> Result<Vec<SSTableReader>> {
        let mut tables = Vec::new();
        for id in list_level(&self.dir, level)? {
            let reader = self.open(id)?;
            let (start, stop) = reader.key_range();
            if start <= hi && lo <= stop {
                tables.push(reader);
            }
        }
        Ok(tables)
    }

    fn delete_all(&self, ids: impl IntoIterator<Item = TableId>) -> Result<()> {
        for id in ids {
            delete_table(&self.dir, id)?;
        }
        Ok(())
    }

    /// Write a sorted stream as tables of at most `chunk` records at `level`.
    ///
    /// On error the partially written table is left as a `.tmp` file for the
    /// orphan sweep.
    fn write_run<I>(
        &self,
        records: I,
        level: usize,
        chunk: usize,
        drop_tombstones: bool,
    ) -> Result<Vec<TableId>>
    where
        I: Iterator<Item = Result<Record>>,
    {
        let mut outputs = Vec::new();
        let mut builder: Option<SSTableBuilder> = None;

        for record in records {
            let record = record?;
            if drop_tombstones && record.tombstone {
                continue;
            }

            let current = match builder.as_mut() {
                Some(current) => current,
                None => builder.insert(SSTableBuilder::new(&self.dir, level, self.table_options)?),
            };
            current.add(&record)?;

            if current.num_entries() >= chunk {
                if let Some(full) = builder.take() {
                    outputs.extend(full.finish()?);
                }
            }
        }

        if let Some(last) = builder {
            outputs.extend(last.finish()?);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::create_sstable;
    use tempfile::TempDir;

    #[test]
    fn test_write_run_chunks_and_drops_tombstones() {
        let dir = TempDir::new().unwrap();
        let compactor = Compactor::new(dir.path(), &Options::default());

        let records: Vec<Record> = (0..25)
            .map(|i| {
                if i % 5 == 0 {
                    Record::tombstone(format!("k{:02}", i), 1)
                } else {
                    Record::new(format!("k{:02}", i), "v", 1)
                }
            })
            .collect();

        let outputs =
            compactor.write_run(records.clone().into_iter().map(Ok), 1, 10, false).unwrap();
        assert_eq!(outputs.len(), 3);

        let outputs = compactor.write_run(records.into_iter().map(Ok), 2, 10, true).unwrap();
        assert_eq!(outputs.len(), 2);
        let total: usize = outputs
            .iter()
            .map(|id| compactor.open(*id).unwrap().iter().unwrap().count())
            .sum();
        assert_eq!(total, 20);
    }

    #[test]
    fn test_last_level_never_compacts() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().levels(1).max_tables_per_level(2);
        for i in 0..4 {
            let record = Record::new(format!("k{}", i), "v", 1);
            create_sstable(&[record], dir.path(), 0, TableOptions::from(&options)).unwrap();
        }

        let compactor = Compactor::new(dir.path(), &options);
        assert_eq!(compactor.run().unwrap(), 0);
        assert_eq!(list_level(dir.path(), 0).unwrap().len(), 4);
    }

    #[test]
    fn test_overlapping_selection() {
        let dir = TempDir::new().unwrap();
        let compactor = Compactor::new(dir.path(), &Options::default());
        let opts = TableOptions::default();
        create_sstable(&[Record::new("a", "1", 1), Record::new("c", "1", 1)], dir.path(), 1, opts)
            .unwrap();
        create_sstable(&[Record::new("m", "1", 1), Record::new("p", "1", 1)], dir.path(), 1, opts)
            .unwrap();

        assert_eq!(compactor.overlapping(1, "b", "b").unwrap().len(), 1);
        assert_eq!(compactor.overlapping(1, "c", "m").unwrap().len(), 2);
        assert!(compactor.overlapping(1, "q", "z").unwrap().is_empty());
    }
}
