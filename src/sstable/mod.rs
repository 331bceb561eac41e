//! SSTable (Sorted String Table) implementation.
//!
//! An SSTable is an immutable, sorted run of records plus the structures
//! needed to find a key without scanning it.
//!
//! ## Components
//!
//! ```text
//! Data.db      CRC-prefixed records in key order
//! Index.db     (key, data offset) for every record
//! Summary.db   first/last key + every n-th index entry (key, index offset)
//! Filter.db    bloom filter over all keys
//! Metadata.db  Merkle root (hex) over the encoded records
//! TOC.txt      names of the files making up the table
//! ```
//!
//! Files are named `usertable-L<level>-<seq>-<Component>`. In the single-file
//! layout every component lives inside `Data.db`, located by a trailer, and
//! the TOC lists only that file.
//!
//! ## Atomicity
//!
//! Components are written under a `.tmp` suffix, fsynced and renamed into
//! place with the TOC renamed last. A table exists if and only if its TOC
//! does. Deletion removes the TOC first. Anything left without a TOC is an
//! orphan and is swept when the database opens.

pub mod builder;
pub mod footer;
pub mod index;
pub mod merkle;
pub mod reader;

pub use builder::{create_sstable, SSTableBuilder, TableOptions};
pub use footer::Trailer;
pub use index::{IndexEntry, Summary};
pub use merkle::MerkleBuilder;
pub use reader::{SSTableReader, TableIterator};

use crate::error::{Error, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Prefix shared by every table file.
pub const TABLE_PREFIX: &str = "usertable";

/// Suffix of files that are still being written.
pub const TMP_SUFFIX: &str = ".tmp";

/// The physical files a table can consist of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Records
    Data,
    /// Per-record index
    Index,
    /// Sparse index over the Index
    Summary,
    /// Bloom filter
    Filter,
    /// Merkle root
    Metadata,
    /// Table of contents
    Toc,
}

impl Component {
    /// Components listed in a many-files TOC, in write order.
    pub const MANY: [Component; 5] = [
        Component::Data,
        Component::Index,
        Component::Summary,
        Component::Filter,
        Component::Metadata,
    ];

    /// File name suffix for this component.
    pub fn suffix(self) -> &'static str {
        match self {
            Component::Data => "Data.db",
            Component::Index => "Index.db",
            Component::Summary => "Summary.db",
            Component::Filter => "Filter.db",
            Component::Metadata => "Metadata.db",
            Component::Toc => "TOC.txt",
        }
    }
}

/// Identity of a table: its level and its sequence number within the level.
///
/// Higher sequence numbers are newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId {
    /// Level the table belongs to
    pub level: usize,
    /// Sequence number, unique within the level
    pub seq: u64,
}

impl TableId {
    /// Create a new TableId
    pub fn new(level: usize, seq: u64) -> Self {
        Self { level, seq }
    }

    /// File name of one component of this table.
    pub fn file_name(&self, component: Component) -> String {
        format!("{}-L{}-{}-{}", TABLE_PREFIX, self.level, self.seq, component.suffix())
    }

    /// Path of one component of this table.
    pub fn path(&self, dir: &Path, component: Component) -> PathBuf {
        dir.join(self.file_name(component))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}-{}", self.level, self.seq)
    }
}

/// Parse `usertable-L<level>-<seq>-<rest>` into the table id and `<rest>`.
///
/// `<rest>` may carry the temporary suffix.
pub fn parse_file_name(name: &str) -> Option<(TableId, &str)> {
    let rest = name.strip_prefix(TABLE_PREFIX)?.strip_prefix("-L")?;
    let (level, rest) = rest.split_once('-')?;
    let (seq, component) = rest.split_once('-')?;
    Some((TableId::new(level.parse().ok()?, seq.parse().ok()?), component))
}

/// Every table file in `dir` with its parsed id and component text.
fn scan_dir(dir: &Path) -> Result<Vec<(TableId, String, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some((id, component)) = name.to_str().and_then(parse_file_name) {
            found.push((id, component.to_string(), entry.path()));
        }
    }
    Ok(found)
}

/// Next free sequence number for `level`: one past the highest in use,
/// counting unfinished `.tmp` files.
pub fn next_sequence(dir: &Path, level: usize) -> Result<u64> {
    let max = scan_dir(dir)?
        .into_iter()
        .filter(|(id, _, _)| id.level == level)
        .map(|(id, _, _)| id.seq)
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

/// Committed tables of `level`, newest first.
pub fn list_level(dir: &Path, level: usize) -> Result<Vec<TableId>> {
    let mut tables: Vec<TableId> = scan_dir(dir)?
        .into_iter()
        .filter(|(id, component, _)| id.level == level && component == Component::Toc.suffix())
        .map(|(id, _, _)| id)
        .collect();
    tables.sort_by(|a, b| b.seq.cmp(&a.seq));
    Ok(tables)
}

/// Read the file names listed in a table's TOC.
pub fn read_toc(dir: &Path, id: TableId) -> Result<Vec<String>> {
    let contents = fs::read_to_string(id.path(dir, Component::Toc))?;
    let files: Vec<String> =
        contents.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect();
    if files.is_empty() {
        return Err(Error::Corruption(format!("Empty TOC for table {}", id)));
    }
    Ok(files)
}

/// Delete a table: the TOC first, then every file it listed.
pub fn delete_table(dir: &Path, id: TableId) -> Result<()> {
    let files = read_toc(dir, id)?;
    fs::remove_file(id.path(dir, Component::Toc))?;

    for file in files {
        match fs::remove_file(dir.join(&file)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    log::info!("Deleted table {}", id);
    Ok(())
}

/// Remove temporary files and components whose table has no TOC.
///
/// Returns the number of files removed.
pub fn sweep_orphans(dir: &Path) -> Result<usize> {
    let files = scan_dir(dir)?;
    let committed: std::collections::HashSet<TableId> = files
        .iter()
        .filter(|(_, component, _)| component == Component::Toc.suffix())
        .map(|(id, _, _)| *id)
        .collect();

    let mut removed = 0;
    for (id, component, path) in files {
        if component.ends_with(TMP_SUFFIX) || !committed.contains(&id) {
            log::warn!("Removing orphaned table file {:?}", path);
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
