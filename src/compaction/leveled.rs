//! Leveled compaction.
//!
//! A level compacts once it holds more tables than its configured limit.
//! Level 0 tables may overlap each other, so they are merged all at once
//! together with every level-1 table touching their combined key range.
//! Tables on deeper levels are key-disjoint and are pushed down one at a
//! time, each merged with the next-level tables it overlaps. Every merge is
//! re-split into tables of `sstable_size` records, which keeps the next
//! level key-disjoint.

use super::{Compactor, MergeIterator, RecordStream};
use crate::error::Result;
use crate::record::Record;
use crate::sstable::{list_level, SSTableReader, TableId};

pub(super) fn compact_level(compactor: &Compactor, level: usize) -> Result<usize> {
    let limit = match compactor.leveled_table_limits.get(level) {
        Some(limit) => *limit,
        None => return Ok(0),
    };
    let tables = list_level(compactor.dir(), level)?;
    if tables.len() <= limit {
        return Ok(0);
    }

    log::info!("Leveled compaction of L{}: {} tables over limit {}", level, tables.len(), limit);
    if level == 0 {
        compact_level_zero(compactor, tables)?;
        Ok(1)
    } else {
        let count = tables.len();
        for id in tables.into_iter().rev() {
            push_down(compactor, id)?;
        }
        Ok(count)
    }
}

/// Merge every L0 table with the overlapping L1 tables into one sorted run.
fn compact_level_zero(compactor: &Compactor, tables: Vec<TableId>) -> Result<()> {
    let mut readers = Vec::with_capacity(tables.len());
    for id in &tables {
        readers.push(compactor.open(*id)?);
    }
    let (lo, hi) = combined_range(&readers);
    let overlapping = compactor.overlapping(1, &lo, &hi)?;

    let mut sources: Vec<RecordStream<'_>> = Vec::new();
    for reader in readers.iter().chain(overlapping.iter()) {
        sources.push(Box::new(reader.iter()?));
    }
    let merged: Vec<Record> = MergeIterator::new(sources)?.collect::<Result<_>>()?;

    let outputs = compactor.write_run(
        merged.into_iter().map(Ok),
        1,
        compactor.sstable_size,
        compactor.is_bottom(1),
    )?;

    let consumed: Vec<TableId> = readers.iter().chain(overlapping.iter()).map(SSTableReader::id).collect();
    drop(readers);
    drop(overlapping);
    compactor.delete_all(consumed)?;

    log::info!("L0 compaction wrote {} tables to L1", outputs.len());
    Ok(())
}

/// Move one table of a deeper level into the next level.
fn push_down(compactor: &Compactor, id: TableId) -> Result<()> {
    let target = id.level + 1;
    let reader = compactor.open(id)?;
    let (lo, hi) = reader.key_range();
    let overlapping = compactor.overlapping(target, lo, hi)?;

    let mut sources: Vec<RecordStream<'_>> = vec![Box::new(reader.iter()?)];
    for table in &overlapping {
        sources.push(Box::new(table.iter()?));
    }
    let outputs = compactor.write_run(
        MergeIterator::new(sources)?,
        target,
        compactor.sstable_size,
        compactor.is_bottom(target),
    )?;

    let consumed: Vec<TableId> =
        std::iter::once(id).chain(overlapping.iter().map(SSTableReader::id)).collect();
    drop(reader);
    drop(overlapping);
    compactor.delete_all(consumed)?;

    log::debug!("Pushed {} down into {} tables of L{}", id, outputs.len(), target);
    Ok(())
}

fn combined_range(readers: &[SSTableReader]) -> (String, String) {
    let mut lo: Option<&str> = None;
    let mut hi: Option<&str> = None;
    for reader in readers {
        let (start, stop) = reader.key_range();
        lo = Some(lo.map_or(start, |current| current.min(start)));
        hi = Some(hi.map_or(stop, |current| current.max(stop)));
    }
    (lo.unwrap_or_default().to_string(), hi.unwrap_or_default().to_string())
}
