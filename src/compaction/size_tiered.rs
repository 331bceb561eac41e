//! Size-tiered compaction.
//!
//! When a level holds `max_tables_per_level` tables they are all folded into
//! one table on the next level. The fold is pairwise from the oldest table:
//! `acc = merge(t_newer, acc)`. The nested merges are streamed and only the
//! final result is written, so no intermediate table ever exists on disk.

use super::{Compactor, MergeIterator, RecordStream};
use crate::error::Result;
use crate::sstable::list_level;

pub(super) fn compact_level(compactor: &Compactor, level: usize) -> Result<usize> {
    let mut passes = 0;

    loop {
        let mut tables = list_level(compactor.dir(), level)?;
        if tables.len() < compactor.max_tables_per_level || tables.len() < 2 {
            return Ok(passes);
        }
        tables.reverse();

        let target = level + 1;
        // Older data for these keys can only live on deeper levels.
        let drop_tombstones =
            compactor.is_bottom(target) && list_level(compactor.dir(), target)?.is_empty();

        let mut readers = Vec::with_capacity(tables.len());
        for id in &tables {
            readers.push(compactor.open(*id)?);
        }

        let mut merged: Option<RecordStream<'_>> = None;
        for reader in &readers {
            let newer: RecordStream<'_> = Box::new(reader.iter()?);
            merged = Some(match merged {
                None => newer,
                Some(acc) => Box::new(MergeIterator::new(vec![newer, acc])?),
            });
        }
        let Some(stream) = merged else {
            return Ok(passes);
        };

        let outputs = compactor.write_run(stream, target, usize::MAX, drop_tombstones)?;
        drop(readers);
        compactor.delete_all(tables.iter().copied())?;

        log::info!(
            "Size-tiered compaction merged {} tables of L{} into {:?}",
            tables.len(),
            level,
            outputs.iter().map(ToString::to_string).collect::<Vec<_>>()
        );
        passes += 1;
    }
}

#[cfg(test)]
mod tests {
    use crate::compaction::Compactor;
    use crate::config::Options;
    use crate::record::Record;
    use crate::sstable::{create_sstable, list_level, SSTableReader, TableOptions};
    use tempfile::TempDir;

    fn options() -> Options {
        Options::default().levels(3).max_tables_per_level(3)
    }

    fn write(dir: &std::path::Path, level: usize, records: &[Record]) {
        create_sstable(records, dir, level, TableOptions::default()).unwrap();
    }

    #[test]
    fn test_below_threshold_is_noop() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), 0, &[Record::new("a", "1", 1)]);
        write(dir.path(), 0, &[Record::new("b", "1", 1)]);

        let compactor = Compactor::new(dir.path(), &options());
        assert_eq!(compactor.run().unwrap(), 0);
        assert_eq!(list_level(dir.path(), 0).unwrap().len(), 2);
    }

    #[test]
    fn test_folds_level_into_one_table() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), 0, &[Record::new("a", "old", 1), Record::new("b", "b1", 1)]);
        write(dir.path(), 0, &[Record::new("a", "new", 2)]);
        write(dir.path(), 0, &[Record::new("c", "c1", 1)]);

        let compactor = Compactor::new(dir.path(), &options());
        assert_eq!(compactor.run().unwrap(), 1);
        assert!(list_level(dir.path(), 0).unwrap().is_empty());

        let l1 = list_level(dir.path(), 1).unwrap();
        assert_eq!(l1.len(), 1);
        let reader = SSTableReader::open(dir.path(), l1[0]).unwrap();
        let records: Vec<Record> = reader.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(
            records,
            vec![Record::new("a", "new", 2), Record::new("b", "b1", 1), Record::new("c", "c1", 1)]
        );
    }

    #[test]
    fn test_equal_timestamps_prefer_newer_table() {
        let dir = TempDir::new().unwrap();
        for value in ["first", "second", "third"] {
            write(dir.path(), 0, &[Record::new("k", value, 7)]);
        }

        Compactor::new(dir.path(), &options()).run().unwrap();
        let l1 = list_level(dir.path(), 1).unwrap();
        let reader = SSTableReader::open(dir.path(), l1[0]).unwrap();
        assert_eq!(reader.get("k").unwrap().unwrap().value, b"third");
    }

    #[test]
    fn test_tombstones_kept_above_bottom_level() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), 0, &[Record::new("k", "v", 1)]);
        write(dir.path(), 0, &[Record::tombstone("k", 2)]);
        write(dir.path(), 0, &[Record::new("x", "v", 1)]);

        Compactor::new(dir.path(), &options()).run().unwrap();
        let l1 = list_level(dir.path(), 1).unwrap();
        let reader = SSTableReader::open(dir.path(), l1[0]).unwrap();
        assert!(reader.get("k").unwrap().unwrap().tombstone);
    }

    #[test]
    fn test_tombstones_dropped_into_empty_bottom_level() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().levels(2).max_tables_per_level(2);
        write(dir.path(), 0, &[Record::new("k", "v", 1)]);
        write(dir.path(), 0, &[Record::tombstone("k", 2), Record::new("z", "v", 2)]);

        Compactor::new(dir.path(), &options).run().unwrap();
        let l1 = list_level(dir.path(), 1).unwrap();
        let reader = SSTableReader::open(dir.path(), l1[0]).unwrap();
        assert!(reader.get("k").unwrap().is_none());
        assert!(reader.get("z").unwrap().is_some());
    }

    #[test]
    fn test_cascades_through_levels() {
        let dir = TempDir::new().unwrap();
        let options = Options::default().levels(3).max_tables_per_level(2);
        for i in 0..2 {
            write(dir.path(), 1, &[Record::new(format!("old{}", i), "v", 1)]);
        }
        // L1 is already at the threshold; the L0 fold adds a third table
        // and the L1 pass then folds everything into L2.
        for i in 0..2 {
            write(dir.path(), 0, &[Record::new(format!("new{}", i), "v", 2)]);
        }

        assert_eq!(Compactor::new(dir.path(), &options).run().unwrap(), 2);
        assert!(list_level(dir.path(), 0).unwrap().is_empty());
        assert!(list_level(dir.path(), 1).unwrap().is_empty());
        assert_eq!(list_level(dir.path(), 2).unwrap().len(), 1);
    }
}
