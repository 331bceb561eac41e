//! WAL segment writer.

use crate::error::{Error, Result};
use crate::record::Record;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends encoded records to a single segment file.
pub struct SegmentWriter {
    /// Path to the segment file
    path: PathBuf,
    /// Buffered writer for efficient I/O
    writer: BufWriter<File>,
    /// Current file size
    file_size: u64,
    /// Records in this segment, including those written before reopening
    records: usize,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl SegmentWriter {
    /// Open a segment in append mode, creating it if it doesn't exist.
    ///
    /// `existing_records` is the number of records already in the file.
    pub fn open<P: AsRef<Path>>(path: P, existing_records: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new().create(true).append(true).open(&path).map_err(Error::Io)?;

        let file_size = file.metadata().map_err(Error::Io)?.len();
        let writer = BufWriter::new(file);

        Ok(Self { path, writer, file_size, records: existing_records, poisoned: false })
    }

    /// Append one record and push it to the OS, fsyncing when `sync` is set.
    ///
    /// A failed append leaves the segment exactly as it was: the buffered
    /// bytes are discarded and the file is cut back to its previous length.
    /// If even that fails the writer stays poisoned and every later append
    /// first retries the repair.
    pub fn append(&mut self, record: &Record, sync: bool) -> Result<()> {
        if self.poisoned {
            self.rollback()?;
        }

        let encoded = record.encode();
        let written = self.writer.write_all(&encoded).map_err(Error::Io).and_then(|()| {
            if sync {
                self.sync()
            } else {
                self.flush()
            }
        });

        if let Err(e) = written {
            self.poisoned = true;
            if let Err(repair) = self.rollback() {
                log::error!("Could not roll back segment {:?}: {}", self.path, repair);
            }
            return Err(e);
        }

        self.file_size += encoded.len() as u64;
        self.records += 1;
        Ok(())
    }

    /// Drop whatever the failed append left behind.
    fn rollback(&mut self) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path).map_err(Error::Io)?;
        // into_parts hands back the unwritten buffer instead of flushing it
        let (_, _discarded) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();

        let file = self.writer.get_ref();
        file.set_len(self.file_size).map_err(Error::Io)?;
        file.sync_all().map_err(Error::Io)?;

        self.poisoned = false;
        log::warn!("Rolled segment {:?} back to {} bytes", self.path, self.file_size);
        Ok(())
    }

    /// True while a failed append has not been rolled back yet.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Sync the segment to disk
    ///
    /// Ensures all buffered data is written and fsync'd to persistent storage.
    pub fn sync(&mut self) -> Result<()> {
        if self.poisoned {
            self.rollback()?;
        }
        self.writer.flush().map_err(Error::Io)?;
        self.writer.get_ref().sync_all().map_err(Error::Io)?;
        Ok(())
    }

    /// Flush buffered bytes to the OS without fsync.
    pub fn flush(&mut self) -> Result<()> {
        if self.poisoned {
            self.rollback()?;
        }
        self.writer.flush().map_err(Error::Io)
    }

    /// Get the current file size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of records in the segment.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Get the path to the segment file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the writer, flushing all data
    pub fn close(mut self) -> Result<()> {
        self.sync()
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        // Best effort flush on drop, unless the buffer holds a failed append
        if !self.poisoned {
            let _ = self.writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::reader::SegmentReader;
    use std::fs::File;
    use tempfile::NamedTempFile;

    #[test]
    fn test_writer_create() {
        let temp_file = NamedTempFile::new().unwrap();
        let writer = SegmentWriter::open(temp_file.path(), 0);
        assert!(writer.is_ok());
    }

    #[test]
    fn test_append_counts_records() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut writer = SegmentWriter::open(temp_file.path(), 0).unwrap();

        for i in 0..10 {
            writer.append(&Record::new(format!("key{}", i), b"v".to_vec(), i), false).unwrap();
        }
        writer.sync().unwrap();

        assert_eq!(writer.records(), 10);
        assert!(writer.file_size() > 0);
    }

    #[test]
    fn test_writer_reopen() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();

        {
            let mut writer = SegmentWriter::open(&path, 0).unwrap();
            writer.append(&Record::new("first", b"1".to_vec(), 1), true).unwrap();
            writer.sync().unwrap();
        }

        // Reopen and append more
        let mut writer = SegmentWriter::open(&path, 1).unwrap();
        let initial_size = writer.file_size();
        writer.append(&Record::new("second", b"2".to_vec(), 2), true).unwrap();
        writer.sync().unwrap();

        assert!(writer.file_size() > initial_size);
        assert_eq!(writer.records(), 2);
    }

    #[test]
    fn test_failed_append_leaves_segment_untouched() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();
        let mut writer = SegmentWriter::open(&path, 0).unwrap();
        writer.append(&Record::new("a", b"1".to_vec(), 1), true).unwrap();
        let size = writer.file_size();

        // A read-only handle makes the flush fail after the bytes were buffered
        writer.writer = BufWriter::new(File::open(&path).unwrap());
        assert!(writer.append(&Record::new("b", b"2".to_vec(), 2), true).is_err());
        assert!(!writer.is_poisoned());
        assert_eq!(writer.records(), 1);
        assert_eq!(writer.file_size(), size);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);

        writer.append(&Record::new("c", b"3".to_vec(), 3), true).unwrap();
        drop(writer);

        let (records, clean) = SegmentReader::new(&path).unwrap().recover_all().unwrap();
        assert!(clean);
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_torn_bytes_cut_before_next_append() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_path_buf();
        let mut writer = SegmentWriter::open(&path, 0).unwrap();
        writer.append(&Record::new("a", b"1".to_vec(), 1), true).unwrap();

        // Half a record reached the file before the write failed and the
        // rollback could not run
        let encoded = Record::new("lost", b"x".to_vec(), 2).encode();
        writer.writer.write_all(&encoded[..10]).unwrap();
        writer.writer.flush().unwrap();
        writer.poisoned = true;

        writer.append(&Record::new("b", b"2".to_vec(), 3), true).unwrap();
        writer.append(&Record::new("c", b"3".to_vec(), 4), true).unwrap();
        assert!(!writer.is_poisoned());
        drop(writer);

        let (records, clean) = SegmentReader::new(&path).unwrap().recover_all().unwrap();
        assert!(clean);
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
