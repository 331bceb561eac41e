//! Record format shared by WAL segments and SSTable Data components.
//!
//! ## Layout
//!
//! ```text
//! [crc32: 4B][timestamp: 8B LE][tombstone: 1B][key_len: 8B LE][key][value_len: 8B LE][value]
//! ```
//!
//! The checksum covers every byte after the checksum field. All integers are
//! little-endian.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;
use std::io::{self, Read};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of the fixed prefix: checksum, timestamp, tombstone flag and key length.
pub const HEADER_SIZE: usize = 4 + 8 + 1 + 8;

/// Size of the value length field.
const VALUE_LEN_SIZE: usize = 8;

/// The atomic unit stored by the engine.
///
/// Among records with the same key, the one with the greatest timestamp is
/// authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// User key.
    pub key: String,
    /// Opaque payload. Empty for tombstones.
    pub value: Vec<u8>,
    /// Whether this record deletes the key.
    pub tombstone: bool,
    /// Seconds since the Unix epoch, monotonic per writer.
    pub timestamp: u64,
}

impl Record {
    /// Create a live record.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>, timestamp: u64) -> Self {
        Self { key: key.into(), value: value.into(), tombstone: false, timestamp }
    }

    /// Create a tombstone for `key`.
    pub fn tombstone(key: impl Into<String>, timestamp: u64) -> Self {
        Self { key: key.into(), value: Vec::new(), tombstone: true, timestamp }
    }

    /// Returns the value if this record is live.
    pub fn live_value(&self) -> Option<&[u8]> {
        if self.tombstone {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Number of bytes `encode` produces.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + VALUE_LEN_SIZE + self.value.len()
    }

    /// Encode the record, checksum first.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());

        // Reserve space for checksum (will be filled later)
        buf.put_u32_le(0);
        buf.put_u64_le(self.timestamp);
        buf.put_u8(self.tombstone as u8);
        buf.put_u64_le(self.key.len() as u64);
        buf.put_slice(self.key.as_bytes());
        buf.put_u64_le(self.value.len() as u64);
        buf.put_slice(&self.value);

        let checksum = checksum(&buf[4..]);
        buf[0..4].copy_from_slice(&checksum.to_le_bytes());

        buf.to_vec()
    }

    /// Decode one record from the front of `data`.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_SIZE {
            return Err(Error::Corruption(format!("Record too short: {} bytes", data.len())));
        }

        let mut buf = data;
        let stored = buf.get_u32_le();
        let timestamp = buf.get_u64_le();
        let tombstone = buf.get_u8() != 0;
        let key_len = to_len(buf.get_u64_le())?;

        if buf.remaining() < key_len.saturating_add(VALUE_LEN_SIZE) {
            return Err(Error::corruption("Incomplete record: key truncated"));
        }
        let key_bytes = &buf[..key_len];
        buf.advance(key_len);

        let value_len = to_len(buf.get_u64_le())?;
        if buf.remaining() < value_len {
            return Err(Error::corruption("Incomplete record: value truncated"));
        }
        let value = buf[..value_len].to_vec();

        let total = HEADER_SIZE + key_len + VALUE_LEN_SIZE + value_len;
        let actual = checksum(&data[4..total]);
        if stored != actual {
            return Err(Error::ChecksumMismatch { expected: stored, actual });
        }

        let key = String::from_utf8(key_bytes.to_vec())
            .map_err(|_| Error::corruption("Record key is not valid UTF-8"))?;

        Ok((Self { key, value, tombstone, timestamp }, total))
    }

    /// Read the next record from a stream.
    ///
    /// Returns `Ok(None)` on a clean end of stream, and
    /// `Err(Error::Corruption)` when the stream ends inside a record.
    /// The raw encoded bytes are returned alongside the record.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<(Self, Vec<u8>)>> {
        let mut header = [0u8; HEADER_SIZE];
        let filled = read_full(reader, &mut header)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < HEADER_SIZE {
            return Err(Error::Corruption(format!(
                "Truncated record header: {} of {} bytes",
                filled, HEADER_SIZE
            )));
        }

        let key_len = to_len((&header[HEADER_SIZE - 8..]).get_u64_le())?;
        let mut raw = header.to_vec();
        read_exactly(reader, &mut raw, key_len as u64)?;

        let mut value_len = [0u8; VALUE_LEN_SIZE];
        if read_full(reader, &mut value_len)? < VALUE_LEN_SIZE {
            return Err(Error::corruption("Truncated record: missing value length"));
        }
        raw.extend_from_slice(&value_len);
        read_exactly(reader, &mut raw, u64::from_le_bytes(value_len))?;

        let (record, _) = Self::decode(&raw)?;
        Ok(Some((record, raw)))
    }
}

/// CRC32 over the bytes following the checksum field.
pub fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn to_len(len: u64) -> Result<usize> {
    usize::try_from(len).map_err(|_| Error::Corruption(format!("Length {} out of range", len)))
}

/// Fill `buf` as far as the stream allows, returning the byte count.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}

/// Append exactly `len` bytes to `out`. Reads through `take` so a corrupt
/// length cannot force a huge up-front allocation.
fn read_exactly<R: Read>(reader: &mut R, out: &mut Vec<u8>, len: u64) -> Result<()> {
    let before = out.len();
    reader.take(len).read_to_end(out)?;
    if ((out.len() - before) as u64) < len {
        return Err(Error::corruption("Truncated record body"));
    }
    Ok(())
}

/// Hands out record timestamps in seconds that never go backwards.
#[derive(Debug, Default)]
pub struct Clock {
    last: u64,
}

impl Clock {
    /// Create a clock that will not issue timestamps below `floor`.
    pub fn with_floor(floor: u64) -> Self {
        Self { last: floor }
    }

    /// Next timestamp: wall-clock seconds, clamped to the last one issued.
    pub fn now(&mut self) -> u64 {
        let wall = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        self.last = self.last.max(wall);
        self.last
    }

    /// Raise the floor after observing a persisted timestamp.
    pub fn observe(&mut self, timestamp: u64) {
        self.last = self.last.max(timestamp);
    }
}
