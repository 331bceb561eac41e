//! Multi-way merge iterator for compaction.
//!
//! Merges several sorted record streams into one sorted stream holding a
//! single record per key. Among records sharing a key the greatest timestamp
//! wins; on equal timestamps the source listed first wins, so sources must be
//! passed newest first. Tombstones take part like any other record.

use crate::error::Result;
use crate::record::Record;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A boxed sorted record stream.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Entry in the merge heap
struct MergeEntry {
    record: Record,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record.key == other.record.key && self.source == other.source
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (smallest key first)
        other.record.key.cmp(&self.record.key).then_with(|| {
            // For equal keys, prefer smaller source index (newer data)
            other.source.cmp(&self.source)
        })
    }
}

/// Multi-way merge iterator over sorted record streams.
pub struct MergeIterator<'a> {
    heap: BinaryHeap<MergeEntry>,
    sources: Vec<RecordStream<'a>>,
    failed: bool,
}

impl<'a> MergeIterator<'a> {
    /// Create a merge iterator. `sources[0]` is the newest.
    pub fn new(sources: Vec<RecordStream<'a>>) -> Result<Self> {
        let mut merge = Self { heap: BinaryHeap::new(), sources, failed: false };
        for index in 0..merge.sources.len() {
            merge.advance_source(index)?;
        }
        Ok(merge)
    }

    /// Merge in-memory sorted runs, newest first.
    pub fn from_runs(runs: Vec<Vec<Record>>) -> Result<Self> {
        Self::new(
            runs.into_iter()
                .map(|run| Box::new(run.into_iter().map(Ok)) as RecordStream<'a>)
                .collect(),
        )
    }

    /// Pull the next record of `index` into the heap
    fn advance_source(&mut self, index: usize) -> Result<()> {
        if let Some(next) = self.sources[index].next() {
            self.heap.push(MergeEntry { record: next?, source: index });
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let first = match self.heap.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };
        self.advance_source(first.source)?;

        let mut winner = first;
        while self.heap.peek().is_some_and(|top| top.record.key == winner.record.key) {
            if let Some(candidate) = self.heap.pop() {
                self.advance_source(candidate.source)?;
                let newer = candidate.record.timestamp > winner.record.timestamp
                    || (candidate.record.timestamp == winner.record.timestamp
                        && candidate.source < winner.source);
                if newer {
                    winner = candidate;
                }
            }
        }

        Ok(Some(winner.record))
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
