//! Write-Ahead Log (WAL) implementation.
//!
//! The WAL ensures durability by persisting all writes before they are applied
//! to the MemTable. This allows recovery from crashes by replaying the log.
//!
//! ## Architecture
//!
//! - **Record Format**: the shared CRC-prefixed format from [`crate::record`]
//! - **Segmentation**: the log is split into `log_<n>.bin` files holding at
//!   most `segment_capacity` records each; a new segment is opened lazily when
//!   the active one is full
//! - **Recovery**: on startup every segment is replayed in numeric order,
//!   stopping at the first record that does not decode
//! - **Retirement**: once a MemTable flush is durable, `empty_log` deletes every
//!   segment and starts over with a fresh `log_1.bin`; after recovery,
//!   `rewrite` swaps the log for what the MemTable still holds, new segments
//!   first
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lsmkv::record::Record;
//! use lsmkv::wal::Wal;
//!
//! # fn main() -> Result<(), lsmkv::Error> {
//! let mut wal = Wal::open("./data/wal", 20, true)?;
//! wal.append(&Record::new("key1", b"value1".to_vec(), 1))?;
//!
//! for record in wal.read_all_entries()? {
//!     println!("Recovered: {}", record.key);
//! }
//! # Ok(())
//! # }
//! ```

pub mod reader;
pub mod writer;

pub use reader::SegmentReader;
pub use writer::SegmentWriter;

use crate::error::{Error, Result};
use crate::record::Record;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of replaying every segment.
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Records that decoded cleanly, oldest first.
    pub records: Vec<Record>,
    /// False if replay stopped at a corrupt or partial record.
    pub clean: bool,
}

/// Segmented WAL manager.
pub struct Wal {
    dir: PathBuf,
    segment_capacity: usize,
    sync: bool,
    active: SegmentWriter,
    active_index: u64,
}

impl Wal {
    /// Open or create the WAL in `dir`.
    ///
    /// Appends continue in the highest-numbered existing segment.
    pub fn open<P: AsRef<Path>>(dir: P, segment_capacity: usize, sync: bool) -> Result<Self> {
        if segment_capacity == 0 {
            return Err(Error::invalid_argument("segment_capacity must be > 0"));
        }
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        sweep_tmp(&dir)?;

        let segments = list_segments(&dir)?;
        let (active_index, existing) = match segments.last() {
            Some((index, path)) => {
                let (records, _) = SegmentReader::new(path)?.recover_all()?;
                (*index, records.len())
            }
            None => (1, 0),
        };

        let active = SegmentWriter::open(dir.join(segment_filename(active_index)), existing)?;
        Ok(Self { dir, segment_capacity, sync, active, active_index })
    }

    /// Append a record, rotating to a new segment if the active one is full.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        if self.active.records() >= self.segment_capacity {
            self.rotate()?;
        }

        self.active.append(record, self.sync)
    }

    fn rotate(&mut self) -> Result<()> {
        self.active.sync()?;
        let next = self.active_index + 1;
        let path = self.dir.join(segment_filename(next));
        self.active = SegmentWriter::open(&path, 0)?;
        self.active_index = next;
        log::info!("WAL rotated to segment {:?}", path);
        Ok(())
    }

    /// Replay all segments, oldest first.
    pub fn replay(&self) -> Result<WalReplay> {
        let mut replay = WalReplay { records: Vec::new(), clean: true };

        for (_, path) in list_segments(&self.dir)? {
            let (records, clean) = SegmentReader::new(&path)?.recover_all()?;
            replay.records.extend(records);
            if !clean {
                replay.clean = false;
                break;
            }
        }

        Ok(replay)
    }

    /// All records that decode cleanly, oldest first.
    pub fn read_all_entries(&self) -> Result<Vec<Record>> {
        Ok(self.replay()?.records)
    }

    /// Delete every segment and start a fresh, empty `log_1.bin`.
    pub fn empty_log(&mut self) -> Result<()> {
        self.active.flush()?;
        let segments = list_segments(&self.dir)?;
        for (_, path) in &segments {
            fs::remove_file(path)?;
        }

        self.active = SegmentWriter::open(self.dir.join(segment_filename(1)), 0)?;
        self.active_index = 1;
        log::info!("WAL emptied ({} segments retired)", segments.len());
        Ok(())
    }

    /// Replace the whole log with `records`.
    ///
    /// The new segments are numbered after every existing one and each is
    /// synced under a temporary name before being renamed into place. Only
    /// then are the old segments deleted, so a crash at any point leaves a
    /// log that replays to at least `records`.
    pub fn rewrite(&mut self, records: &[Record]) -> Result<()> {
        self.active.flush()?;
        let old = list_segments(&self.dir)?;
        let first = old.last().map_or(1, |(index, _)| index + 1);

        let mut next = first;
        let mut last_len = 0;
        for chunk in records.chunks(self.segment_capacity) {
            let path = self.dir.join(segment_filename(next));
            let tmp = path.with_extension("tmp");
            let mut writer = SegmentWriter::open(&tmp, 0)?;
            for record in chunk {
                writer.append(record, false)?;
            }
            writer.close()?;
            fs::rename(&tmp, &path)?;
            last_len = chunk.len();
            next += 1;
        }

        let active_index = if next == first { first } else { next - 1 };
        self.active =
            SegmentWriter::open(self.dir.join(segment_filename(active_index)), last_len)?;
        self.active_index = active_index;
        sync_dir(&self.dir);

        for (_, path) in &old {
            fs::remove_file(path)?;
        }
        log::info!(
            "WAL rewritten: {} records in segments {}..={}, {} old segments retired",
            records.len(),
            first,
            active_index,
            old.len()
        );
        Ok(())
    }

    /// Sync the active segment to disk
    pub fn sync(&mut self) -> Result<()> {
        self.active.sync()
    }

    /// Paths of every segment, in replay order.
    pub fn segment_paths(&self) -> Result<Vec<PathBuf>> {
        Ok(list_segments(&self.dir)?.into_iter().map(|(_, path)| path).collect())
    }

    /// Directory holding the segments.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Close the WAL
    pub fn close(self) -> Result<()> {
        self.active.close()
    }
}

/// Generate a segment filename for a given segment number
pub fn segment_filename(index: u64) -> String {
    format!("log_{}.bin", index)
}

/// Parse a segment filename to extract the segment number
pub fn parse_segment_filename(filename: &str) -> Option<u64> {
    filename.strip_prefix("log_")?.strip_suffix(".bin")?.parse().ok()
}

/// Remove segments a crashed `rewrite` never renamed into place.
fn sweep_tmp(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing unfinished WAL segment {:?}", path);
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Best effort: persist renames in `dir`.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Segment files in `dir` sorted by number.
fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(index) = entry.file_name().to_str().and_then(parse_segment_filename) {
            segments.push((index, entry.path()));
        }
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}
