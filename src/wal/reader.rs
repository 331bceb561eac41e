//! WAL segment reader for recovery.

use crate::error::{Error, Result};
use crate::record::Record;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Reads records back from one segment file.
pub struct SegmentReader {
    /// Path, kept for log messages
    path: PathBuf,
    /// Buffered reader for efficient I/O
    reader: BufReader<File>,
    /// Current read position
    position: u64,
}

impl SegmentReader {
    /// Open a segment file for reading
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(Error::Io)?;
        let reader = BufReader::new(file);

        Ok(Self { path, reader, position: 0 })
    }

    /// Read the next record.
    ///
    /// Returns None at a clean end of file.
    pub fn read_next(&mut self) -> Result<Option<Record>> {
        match Record::read_from(&mut self.reader)? {
            Some((record, raw)) => {
                self.position += raw.len() as u64;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Get the current read position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Recover all records from the segment.
    ///
    /// Stops at the first undecodable record. The flag is false when the
    /// segment did not end cleanly.
    pub fn recover_all(&mut self) -> Result<(Vec<Record>, bool)> {
        let mut records = Vec::new();

        loop {
            match self.read_next() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => return Ok((records, true)),
                Err(e @ (Error::Corruption(_) | Error::ChecksumMismatch { .. })) => {
                    log::warn!(
                        "WAL corruption in {:?} at position {}: {}",
                        self.path,
                        self.position,
                        e
                    );
                    return Ok((records, false));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
