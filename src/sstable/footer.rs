//! Trailer of a single-file SSTable.
//!
//! In the single-file layout every component is concatenated into the Data
//! file. The last 24 bytes locate the components that follow the records:
//!
//! ```text
//! [data records][index][summary][filter][merkle root hex][trailer: 24B]
//!
//! trailer = [index_offset: 8B LE][summary_offset: 8B LE][filter_offset: 8B LE]
//! ```

use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Size of the encoded trailer.
pub const TRAILER_SIZE: usize = 24;

/// Component offsets within a single-file table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Start of the Index component; also the end of the Data records
    pub index_offset: u64,
    /// Start of the Summary component
    pub summary_offset: u64,
    /// Start of the Filter component
    pub filter_offset: u64,
}

impl Trailer {
    /// Create a new Trailer
    pub fn new(index_offset: u64, summary_offset: u64, filter_offset: u64) -> Self {
        Self { index_offset, summary_offset, filter_offset }
    }

    /// Encode the trailer to bytes (24 bytes)
    pub fn encode(&self) -> [u8; TRAILER_SIZE] {
        let mut buf = [0u8; TRAILER_SIZE];
        buf[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.summary_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.filter_offset.to_le_bytes());
        buf
    }

    /// Decode a trailer and check it against the file length.
    pub fn decode(data: &[u8], file_len: u64) -> Result<Self> {
        if data.len() != TRAILER_SIZE {
            return Err(Error::corruption(format!(
                "Trailer size mismatch: expected {}, got {}",
                TRAILER_SIZE,
                data.len()
            )));
        }

        let read = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&data[at..at + 8]);
            u64::from_le_bytes(word)
        };
        let trailer = Self::new(read(0), read(8), read(16));

        let body_end = file_len.saturating_sub(TRAILER_SIZE as u64);
        if trailer.index_offset > trailer.summary_offset
            || trailer.summary_offset > trailer.filter_offset
            || trailer.filter_offset > body_end
        {
            return Err(Error::corruption(format!("Trailer offsets out of order: {:?}", trailer)));
        }

        Ok(trailer)
    }

    /// Write the trailer to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode())?;
        Ok(())
    }

    /// Read the trailer from a reader positioned at it
    pub fn read_from<R: Read>(reader: &mut R, file_len: u64) -> Result<Self> {
        let mut buf = [0u8; TRAILER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::decode(&buf, file_len)
    }
}
