//! SSTable builder implementation.
//!
//! Streams sorted records into the Data component, then derives the Index,
//! Summary, Filter and Metadata components and commits the table by renaming
//! its TOC into place.

use crate::config::{Options, SSTableLayout};
use crate::error::{Error, Result};
use crate::filter::{BloomFilter, Filter};
use crate::record::Record;
use crate::sstable::footer::Trailer;
use crate::sstable::index::{encode_index, IndexEntry, Summary};
use crate::sstable::merkle::MerkleBuilder;
use crate::sstable::{next_sequence, Component, TableId, TMP_SUFFIX};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Table-level settings taken from [`Options`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableOptions {
    /// Physical layout
    pub layout: SSTableLayout,
    /// Summary sampling stride
    pub summary_stride: usize,
    /// Bloom filter false positive rate
    pub bloom_fp_rate: f64,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions::from(&Options::default())
    }
}

impl From<&Options> for TableOptions {
    fn from(options: &Options) -> Self {
        Self {
            layout: options.sstable_layout,
            summary_stride: options.summary_stride,
            bloom_fp_rate: options.bloom_filter_fp_rate,
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TMP_SUFFIX);
    PathBuf::from(name)
}

/// SSTableBuilder builds one table.
///
/// Usage:
/// ```no_run
/// use lsmkv::record::Record;
/// use lsmkv::sstable::{SSTableBuilder, TableOptions};
///
/// let dir = std::path::Path::new("./usertables");
/// let mut builder = SSTableBuilder::new(dir, 0, TableOptions::default()).unwrap();
/// builder.add(&Record::new("key1", b"value1".to_vec(), 1)).unwrap();
/// builder.add(&Record::new("key2", b"value2".to_vec(), 1)).unwrap();
/// let id = builder.finish().unwrap();
/// ```
pub struct SSTableBuilder {
    dir: PathBuf,
    id: TableId,
    options: TableOptions,
    writer: BufWriter<File>,
    data_tmp: PathBuf,
    data_offset: u64,
    index: Vec<IndexEntry>,
    merkle: MerkleBuilder,
}

impl SSTableBuilder {
    /// Start a new table at `level`, allocating its sequence number from
    /// the files already in `dir`.
    pub fn new(dir: &Path, level: usize, options: TableOptions) -> Result<Self> {
        let id = TableId::new(level, next_sequence(dir, level)?);
        let data_tmp = tmp_path(&id.path(dir, Component::Data));
        let writer = BufWriter::new(File::create(&data_tmp)?);

        Ok(Self {
            dir: dir.to_path_buf(),
            id,
            options,
            writer,
            data_tmp,
            data_offset: 0,
            index: Vec::new(),
            merkle: MerkleBuilder::new(),
        })
    }

    /// Identity the table will have once committed.
    pub fn id(&self) -> TableId {
        self.id
    }

    /// Add a record. Keys must be strictly increasing.
    pub fn add(&mut self, record: &Record) -> Result<()> {
        if let Some(last) = self.index.last() {
            if record.key <= last.key {
                return Err(Error::invalid_argument(format!(
                    "Keys must be added in sorted order: {:?} after {:?}",
                    record.key, last.key
                )));
            }
        }

        let encoded = record.encode();
        self.writer.write_all(&encoded)?;
        self.merkle.add(&encoded);
        self.index.push(IndexEntry::new(record.key.clone(), self.data_offset));
        self.data_offset += encoded.len() as u64;
        Ok(())
    }

    /// Number of records added so far.
    pub fn num_entries(&self) -> usize {
        self.index.len()
    }

    /// Write the remaining components and commit the table.
    ///
    /// Returns `None` without creating anything when no record was added.
    pub fn finish(mut self) -> Result<Option<TableId>> {
        if self.index.is_empty() {
            self.abandon()?;
            return Ok(None);
        }

        let (index_bytes, index_offsets) = encode_index(&self.index);
        let summary = Summary::build(&self.index, &index_offsets, self.options.summary_stride)?;
        let mut filter = BloomFilter::new(self.index.len(), self.options.bloom_fp_rate);
        for entry in &self.index {
            filter.add(entry.key.as_bytes());
        }
        let merkle_root = self.merkle.root_hex();

        let toc = match self.options.layout {
            SSTableLayout::Many => {
                self.sync_data()?;
                let parts = [
                    (Component::Index, index_bytes),
                    (Component::Summary, summary.encode()),
                    (Component::Filter, filter.encode()),
                    (Component::Metadata, merkle_root.into_bytes()),
                ];
                let mut staged = Vec::with_capacity(parts.len());
                for (component, bytes) in parts {
                    staged.push((component, self.write_tmp(component, &bytes)?));
                }

                fs::rename(&self.data_tmp, self.id.path(&self.dir, Component::Data))?;
                for (component, tmp) in staged {
                    fs::rename(tmp, self.id.path(&self.dir, component))?;
                }
                Component::MANY.iter().map(|c| self.id.file_name(*c)).collect::<Vec<_>>()
            }
            SSTableLayout::Single => {
                let index_offset = self.data_offset;
                let summary_offset = index_offset + index_bytes.len() as u64;
                let summary_bytes = summary.encode();
                let filter_offset = summary_offset + summary_bytes.len() as u64;

                self.writer.write_all(&index_bytes)?;
                self.writer.write_all(&summary_bytes)?;
                self.writer.write_all(&filter.encode())?;
                self.writer.write_all(merkle_root.as_bytes())?;
                Trailer::new(index_offset, summary_offset, filter_offset)
                    .write_to(&mut self.writer)?;
                self.sync_data()?;

                fs::rename(&self.data_tmp, self.id.path(&self.dir, Component::Data))?;
                vec![self.id.file_name(Component::Data)]
            }
        };

        let mut toc_contents = toc.join("\n");
        toc_contents.push('\n');
        let toc_tmp = self.write_tmp(Component::Toc, toc_contents.as_bytes())?;
        fs::rename(toc_tmp, self.id.path(&self.dir, Component::Toc))?;
        sync_dir(&self.dir);

        log::info!(
            "Created table {} with {} records ({:?} layout)",
            self.id,
            self.index.len(),
            self.options.layout
        );
        Ok(Some(self.id))
    }

    /// Discard the table, removing the partially written Data file.
    pub fn abandon(self) -> Result<()> {
        let SSTableBuilder { writer, data_tmp, .. } = self;
        drop(writer);
        match fs::remove_file(&data_tmp) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn sync_data(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn write_tmp(&self, component: Component, bytes: &[u8]) -> Result<PathBuf> {
        let path = tmp_path(&self.id.path(&self.dir, component));
        let mut file = File::create(&path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(path)
    }
}

/// Best effort: persist the renames themselves. Not every platform can open
/// a directory for syncing.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Write `records` (sorted, unique keys) as a new table at `level`.
pub fn create_sstable(
    records: &[Record],
    dir: &Path,
    level: usize,
    options: TableOptions,
) -> Result<Option<TableId>> {
    let mut builder = SSTableBuilder::new(dir, level, options)?;
    for record in records {
        if let Err(e) = builder.add(record) {
            builder.abandon()?;
            return Err(e);
        }
    }
    builder.finish()
}
