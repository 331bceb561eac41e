//! SSTable reader implementation.
//!
//! Opening a table loads its Summary, Filter and Merkle root. Point lookups
//! then go Filter, Summary, a bounded slice of the Index, and finally one
//! Data record whose CRC is verified.

use crate::config::SSTableLayout;
use crate::error::{Error, Result};
use crate::filter::{BloomFilter, Filter};
use crate::record::Record;
use crate::sstable::footer::{Trailer, TRAILER_SIZE};
use crate::sstable::index::{IndexEntry, Summary};
use crate::sstable::merkle::MerkleBuilder;
use crate::sstable::{read_toc, Component, TableId};
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};

/// Decision for one index entry during a scan.
enum ScanStep {
    Skip,
    Take,
    Stop,
}

/// SSTableReader provides lookups and scans over one committed table.
#[derive(Debug)]
pub struct SSTableReader {
    id: TableId,
    layout: SSTableLayout,
    data_path: PathBuf,
    /// Records occupy `[0, data_len)` of the Data file
    data_len: u64,
    index_path: PathBuf,
    /// Where the Index starts within `index_path`
    index_base: u64,
    index_len: u64,
    summary: Summary,
    filter: BloomFilter,
    merkle_root: String,
}

impl SSTableReader {
    /// Open a committed table through its TOC.
    pub fn open(dir: &Path, id: TableId) -> Result<Self> {
        let toc = read_toc(dir, id)?;
        let data_name = id.file_name(Component::Data);
        if !toc.contains(&data_name) {
            return Err(Error::Corruption(format!("TOC of table {} does not list {}", id, data_name)));
        }
        let data_path = dir.join(&data_name);

        if toc.len() == 1 {
            Self::open_single(id, data_path)
        } else {
            Self::open_many(dir, id, data_path)
        }
    }

    fn open_many(dir: &Path, id: TableId, data_path: PathBuf) -> Result<Self> {
        let index_path = id.path(dir, Component::Index);
        let summary = Summary::decode(&fs::read(id.path(dir, Component::Summary))?)?;
        let filter = BloomFilter::decode(&fs::read(id.path(dir, Component::Filter))?)?;
        let merkle_root = fs::read_to_string(id.path(dir, Component::Metadata))?;

        Ok(Self {
            id,
            layout: SSTableLayout::Many,
            data_len: fs::metadata(&data_path)?.len(),
            index_len: fs::metadata(&index_path)?.len(),
            data_path,
            index_path,
            index_base: 0,
            summary,
            filter,
            merkle_root: merkle_root.trim().to_string(),
        })
    }

    fn open_single(id: TableId, data_path: PathBuf) -> Result<Self> {
        let mut file = File::open(&data_path)?;
        let file_len = file.metadata()?.len();
        if file_len < TRAILER_SIZE as u64 {
            return Err(Error::Corruption(format!("Table {} too short for a trailer", id)));
        }

        file.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;
        let trailer = Trailer::read_from(&mut file, file_len)?;

        let summary_bytes =
            read_range(&mut file, trailer.summary_offset, trailer.filter_offset)?;
        let summary = Summary::decode(&summary_bytes)?;

        // Filter and Merkle root share the region before the trailer; the
        // filter header tells where it ends.
        let tail = read_range(&mut file, trailer.filter_offset, file_len - TRAILER_SIZE as u64)?;
        if tail.len() < 8 {
            return Err(Error::corruption("Filter header truncated"));
        }
        let m = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]) as usize;
        let k = u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]) as usize;
        let filter_len = 8 + m + k * crate::filter::bloom::SEED_SIZE;
        if filter_len > tail.len() {
            return Err(Error::corruption("Filter extends past trailer"));
        }
        let filter = BloomFilter::decode(&tail[..filter_len])?;
        let merkle_root = String::from_utf8(tail[filter_len..].to_vec())
            .map_err(|_| Error::corruption("Merkle root is not valid UTF-8"))?;

        Ok(Self {
            id,
            layout: SSTableLayout::Single,
            index_path: data_path.clone(),
            data_path,
            data_len: trailer.index_offset,
            index_base: trailer.index_offset,
            index_len: trailer.summary_offset - trailer.index_offset,
            summary,
            filter,
            merkle_root,
        })
    }

    /// Table identity.
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Physical layout the table was written with.
    pub fn layout(&self) -> SSTableLayout {
        self.layout
    }

    /// Smallest and largest key in the table.
    pub fn key_range(&self) -> (&str, &str) {
        (&self.summary.start, &self.summary.stop)
    }

    /// Stored Merkle root.
    pub fn merkle_root(&self) -> &str {
        &self.merkle_root
    }

    /// Look up a key.
    ///
    /// Tombstones are returned as found records; the caller decides what a
    /// deletion means. A CRC mismatch on the Data record is an error.
    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        if !self.filter.may_contain(key.as_bytes()) {
            log::debug!("Bloom filter rejected {:?} in table {}", key, self.id);
            return Ok(None);
        }

        let (from, to) = match self.summary.locate(key) {
            Some(range) => range,
            None => return Ok(None),
        };

        let mut index = self.open_index_at(from)?;
        let mut pos = from;
        while pos <= to && pos < self.index_len {
            let entry = match IndexEntry::read_from(&mut index)? {
                Some(entry) => entry,
                None => break,
            };
            pos += entry.encoded_len() as u64;

            match entry.key.as_str().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Greater => break,
                std::cmp::Ordering::Equal => {
                    let mut data = BufReader::new(File::open(&self.data_path)?);
                    let record = self.read_record_at(&mut data, entry.offset)?;
                    if record.key != key {
                        return Err(Error::Corruption(format!(
                            "Index of table {} points {:?} at record {:?}",
                            self.id, key, record.key
                        )));
                    }
                    return Ok(Some(record));
                }
            }
        }

        Ok(None)
    }

    /// Records with `start <= key <= stop`, tombstones included, in key order.
    pub fn range_scan(&self, start: &str, stop: &str) -> Result<Vec<Record>> {
        if start > stop || !self.summary.overlaps(start, stop) {
            return Ok(Vec::new());
        }
        self.scan_from(start, |key| {
            if key < start {
                ScanStep::Skip
            } else if key > stop {
                ScanStep::Stop
            } else {
                ScanStep::Take
            }
        })
    }

    /// Records whose key starts with `prefix`, tombstones included, in key order.
    pub fn prefix_scan(&self, prefix: &str) -> Result<Vec<Record>> {
        if self.summary.stop.as_str() < prefix {
            return Ok(Vec::new());
        }
        self.scan_from(prefix, |key| {
            if key.starts_with(prefix) {
                ScanStep::Take
            } else if key < prefix {
                ScanStep::Skip
            } else {
                ScanStep::Stop
            }
        })
    }

    /// Walk the Index from the Summary sample at or before `from_key`.
    fn scan_from(&self, from_key: &str, step: impl Fn(&str) -> ScanStep) -> Result<Vec<Record>> {
        let start = self.summary.floor_offset(from_key);
        let mut index = self.open_index_at(start)?;
        let mut data = BufReader::new(File::open(&self.data_path)?);
        let mut pos = start;
        let mut records = Vec::new();

        while pos < self.index_len {
            let entry = match IndexEntry::read_from(&mut index)? {
                Some(entry) => entry,
                None => break,
            };
            pos += entry.encoded_len() as u64;

            match step(&entry.key) {
                ScanStep::Skip => {}
                ScanStep::Take => records.push(self.read_record_at(&mut data, entry.offset)?),
                ScanStep::Stop => break,
            }
        }

        Ok(records)
    }

    fn open_index_at(&self, offset: u64) -> Result<Take<BufReader<File>>> {
        let mut reader = BufReader::new(File::open(&self.index_path)?);
        reader.seek(SeekFrom::Start(self.index_base + offset))?;
        Ok(reader.take(self.index_len.saturating_sub(offset)))
    }

    fn read_record_at(&self, data: &mut BufReader<File>, offset: u64) -> Result<Record> {
        if offset >= self.data_len {
            return Err(Error::Corruption(format!(
                "Data offset {} beyond end of table {}",
                offset, self.id
            )));
        }
        data.seek(SeekFrom::Start(offset))?;
        let mut bounded = data.take(self.data_len - offset);
        match Record::read_from(&mut bounded)? {
            Some((record, _)) => Ok(record),
            None => Err(Error::Corruption(format!("No record at offset {} in {}", offset, self.id))),
        }
    }

    /// Iterate every record of the table in key order.
    pub fn iter(&self) -> Result<TableIterator> {
        let reader = BufReader::new(File::open(&self.data_path)?);
        Ok(TableIterator { reader: reader.take(self.data_len), done: false })
    }

    /// Recompute the Merkle root over the Data records and compare it with
    /// the stored one.
    pub fn verify_integrity(&self) -> Result<()> {
        let mut iter = self.iter()?;
        let mut merkle = MerkleBuilder::new();
        while let Some((_, raw)) = iter.next_raw()? {
            merkle.add(&raw);
        }

        let actual = merkle.root_hex();
        if actual != self.merkle_root {
            return Err(Error::IntegrityMismatch { expected: self.merkle_root.clone(), actual });
        }
        Ok(())
    }
}

fn read_range(file: &mut File, start: u64, end: u64) -> Result<Vec<u8>> {
    if end < start {
        return Err(Error::Corruption(format!("Invalid component range {}..{}", start, end)));
    }
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.take(end - start).read_to_end(&mut buf)?;
    if buf.len() as u64 != end - start {
        return Err(Error::corruption("Component truncated"));
    }
    Ok(buf)
}

/// Streams the records of one table in key order.
pub struct TableIterator {
    reader: Take<BufReader<File>>,
    done: bool,
}

impl TableIterator {
    /// Next record together with its encoded bytes.
    pub fn next_raw(&mut self) -> Result<Option<(Record, Vec<u8>)>> {
        if self.done {
            return Ok(None);
        }
        let next = Record::read_from(&mut self.reader);
        if !matches!(next, Ok(Some(_))) {
            self.done = true;
        }
        next
    }
}

impl Iterator for TableIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_raw().transpose().map(|item| item.map(|(record, _)| record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::builder::{create_sstable, TableOptions};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn build(dir: &Path, layout: SSTableLayout, n: usize) -> SSTableReader {
        let records: Vec<Record> = (0..n)
            .map(|i| {
                if i % 7 == 3 {
                    Record::tombstone(format!("key{:03}", i), i as u64)
                } else {
                    Record::new(format!("key{:03}", i), format!("value{}", i), i as u64)
                }
            })
            .collect();
        let options = TableOptions { layout, ..TableOptions::default() };
        let id = create_sstable(&records, dir, 0, options).unwrap().unwrap();
        SSTableReader::open(dir, id).unwrap()
    }

    fn layouts() -> [SSTableLayout; 2] {
        [SSTableLayout::Many, SSTableLayout::Single]
    }

    #[test]
    fn test_point_lookups() {
        for layout in layouts() {
            let dir = TempDir::new().unwrap();
            let reader = build(dir.path(), layout, 50);
            assert_eq!(reader.layout(), layout);

            for i in 0..50 {
                let key = format!("key{:03}", i);
                let record = reader.get(&key).unwrap().expect("key present");
                assert_eq!(record.key, key);
                assert_eq!(record.tombstone, i % 7 == 3);
                if !record.tombstone {
                    assert_eq!(record.value, format!("value{}", i).into_bytes());
                }
            }
            assert!(reader.get("key0005").unwrap().is_none());
            assert!(reader.get("aaa").unwrap().is_none());
            assert!(reader.get("zzz").unwrap().is_none());
        }
    }

    #[test]
    fn test_scans() {
        for layout in layouts() {
            let dir = TempDir::new().unwrap();
            let reader = build(dir.path(), layout, 50);

            let range = reader.range_scan("key010", "key019").unwrap();
            assert_eq!(range.len(), 10);
            assert_eq!(range[0].key, "key010");
            assert_eq!(range[9].key, "key019");

            let prefixed = reader.prefix_scan("key02").unwrap();
            assert_eq!(prefixed.len(), 10);
            assert!(prefixed.iter().all(|r| r.key.starts_with("key02")));

            assert!(reader.range_scan("zz", "zzz").unwrap().is_empty());
            assert!(reader.prefix_scan("nope").unwrap().is_empty());
            assert_eq!(reader.key_range(), ("key000", "key049"));
        }
    }

    #[test]
    fn test_iterate_and_verify() {
        for layout in layouts() {
            let dir = TempDir::new().unwrap();
            let reader = build(dir.path(), layout, 20);

            let all: Vec<Record> = reader.iter().unwrap().map(|r| r.unwrap()).collect();
            assert_eq!(all.len(), 20);
            assert!(all.windows(2).all(|w| w[0].key < w[1].key));
            reader.verify_integrity().unwrap();
        }
    }

    #[test]
    fn test_crc_mismatch_is_integrity_error() {
        for layout in layouts() {
            let dir = TempDir::new().unwrap();
            let reader = build(dir.path(), layout, 1);

            // Flip the last value byte of the only record.
            let record_len = Record::new("key000", "value0", 0).encoded_len() as u64;
            let mut file = OpenOptions::new().write(true).open(&reader.data_path).unwrap();
            file.seek(SeekFrom::Start(record_len - 1)).unwrap();
            file.write_all(b"X").unwrap();
            file.sync_all().unwrap();

            let err = reader.get("key000").unwrap_err();
            assert!(matches!(err, Error::ChecksumMismatch { .. }), "{:?}", err);
            assert!(reader.verify_integrity().unwrap_err().is_integrity());
        }
    }

    #[test]
    fn test_merkle_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let reader = build(dir.path(), SSTableLayout::Many, 5);
        fs::write(reader.id().path(dir.path(), Component::Metadata), "00").unwrap();

        let reopened = SSTableReader::open(dir.path(), reader.id()).unwrap();
        let err = reopened.verify_integrity().unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch { .. }));
    }
}
