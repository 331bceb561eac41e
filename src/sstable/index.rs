//! Index and Summary components.
//!
//! ## Index
//!
//! One entry per record, in key order, pointing into the Data records:
//!
//! ```text
//! [key_len: 8B LE][key][data_offset: 8B LE]
//! ```
//!
//! ## Summary
//!
//! The first and last key of the table followed by a sparse sample of index
//! entries (every `stride`-th entry plus the first and the last), each pointing
//! into the Index:
//!
//! ```text
//! [start_len: 8B][start][stop_len: 8B][stop]{[key_len: 8B][key][index_offset: 8B]}*
//! ```

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};
use std::io::Read;

/// A key and the byte offset it points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The record key
    pub key: String,
    /// Byte offset into the Data records (Index) or into the Index (Summary)
    pub offset: u64,
}

impl IndexEntry {
    /// Create a new IndexEntry
    pub fn new(key: impl Into<String>, offset: u64) -> Self {
        Self { key: key.into(), offset }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        8 + self.key.len() + 8
    }

    /// Append the encoded entry to `buf`.
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_key(buf, &self.key);
        buf.put_u64_le(self.offset);
    }

    /// Decode an entry from the front of `data`, advancing it.
    pub fn decode_from(data: &mut &[u8]) -> Result<Self> {
        let key = get_key(data)?;
        if data.remaining() < 8 {
            return Err(Error::corruption("Index entry truncated"));
        }
        Ok(Self { key, offset: data.get_u64_le() })
    }

    /// Read the next entry from a stream. `Ok(None)` at a clean end.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut len = [0u8; 8];
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        }

        let key_len = u64::from_le_bytes(len);
        let mut key = Vec::new();
        reader.take(key_len).read_to_end(&mut key)?;
        if key.len() as u64 != key_len {
            return Err(Error::corruption("Index key truncated"));
        }

        let mut offset = [0u8; 8];
        reader.read_exact(&mut offset).map_err(|_| Error::corruption("Index entry truncated"))?;

        let key = String::from_utf8(key).map_err(|_| Error::corruption("Index key not UTF-8"))?;
        Ok(Some(Self { key, offset: u64::from_le_bytes(offset) }))
    }
}

/// Encode the Index component.
///
/// Returns the bytes and the offset of every entry within them.
pub fn encode_index(entries: &[IndexEntry]) -> (Vec<u8>, Vec<u64>) {
    let mut buf = Vec::with_capacity(entries.iter().map(IndexEntry::encoded_len).sum());
    let mut offsets = Vec::with_capacity(entries.len());

    for entry in entries {
        offsets.push(buf.len() as u64);
        entry.encode_to(&mut buf);
    }

    (buf, offsets)
}

/// Second-level index over the Index component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Smallest key in the table
    pub start: String,
    /// Largest key in the table
    pub stop: String,
    /// Sampled (key, index offset) pairs in key order
    pub samples: Vec<IndexEntry>,
}

impl Summary {
    /// Sample `index` every `stride` entries, always keeping the first and last.
    ///
    /// `index_offsets[i]` is where `index[i]` starts in the Index component.
    pub fn build(index: &[IndexEntry], index_offsets: &[u64], stride: usize) -> Result<Self> {
        let (first, last) = match (index.first(), index.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::invalid_argument("Cannot summarize an empty index")),
        };
        let stride = stride.max(1);
        let n = index.len();

        let samples = index
            .iter()
            .zip(index_offsets)
            .enumerate()
            .filter(|(i, _)| *i == 0 || *i == n - 1 || i % stride == 0)
            .map(|(_, (entry, offset))| IndexEntry::new(entry.key.clone(), *offset))
            .collect();

        Ok(Self { start: first.key.clone(), stop: last.key.clone(), samples })
    }

    /// Encode the Summary component.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_key(&mut buf, &self.start);
        put_key(&mut buf, &self.stop);
        for sample in &self.samples {
            sample.encode_to(&mut buf);
        }
        buf
    }

    /// Decode the Summary component.
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        let start = get_key(&mut data)?;
        let stop = get_key(&mut data)?;
        let mut samples = Vec::new();
        while data.has_remaining() {
            samples.push(IndexEntry::decode_from(&mut data)?);
        }
        if samples.is_empty() {
            return Err(Error::corruption("Summary has no samples"));
        }
        Ok(Self { start, stop, samples })
    }

    /// Whether `key` falls inside `[start, stop]`.
    pub fn covers(&self, key: &str) -> bool {
        self.start.as_str() <= key && key <= self.stop.as_str()
    }

    /// Whether the table may hold keys in the inclusive range `[lo, hi]`.
    pub fn overlaps(&self, lo: &str, hi: &str) -> bool {
        lo <= self.stop.as_str() && self.start.as_str() <= hi
    }

    /// Bound the Index bytes that may hold `key`.
    ///
    /// Returns `(from, to)`: scanning must start at `from` and may stop after
    /// the entry that begins at `to`. `None` if the key is outside the table.
    pub fn locate(&self, key: &str) -> Option<(u64, u64)> {
        if !self.covers(key) {
            return None;
        }

        let mut prev = self.samples[0].offset;
        for sample in &self.samples {
            match sample.key.as_str().cmp(key) {
                std::cmp::Ordering::Equal => return Some((sample.offset, sample.offset)),
                std::cmp::Ordering::Greater => return Some((prev, sample.offset)),
                std::cmp::Ordering::Less => prev = sample.offset,
            }
        }
        // The last sample is `stop`, which covers() already bounded.
        None
    }

    /// Index offset of the last sample at or before `key`; where a forward
    /// scan for keys `>= key` should begin.
    pub fn floor_offset(&self, key: &str) -> u64 {
        self.samples
            .iter()
            .take_while(|sample| sample.key.as_str() <= key)
            .last()
            .unwrap_or(&self.samples[0])
            .offset
    }
}

fn put_key(buf: &mut Vec<u8>, key: &str) {
    buf.put_u64_le(key.len() as u64);
    buf.put_slice(key.as_bytes());
}

fn get_key(data: &mut &[u8]) -> Result<String> {
    if data.remaining() < 8 {
        return Err(Error::corruption("Key length truncated"));
    }
    let len = usize::try_from(data.get_u64_le())
        .map_err(|_| Error::corruption("Key length out of range"))?;
    if data.remaining() < len {
        return Err(Error::corruption("Key truncated"));
    }
    let key = String::from_utf8(data[..len].to_vec())
        .map_err(|_| Error::corruption("Key is not valid UTF-8"))?;
    data.advance(len);
    Ok(key)
}
