//! Error types for the lsmkv storage engine.

use std::io;
use thiserror::Error;

/// The result type used throughout lsmkv.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for lsmkv operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Bytes on disk could not be decoded (bad TOC, short trailer, truncated record).
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A data record failed its CRC check.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The checksum stored alongside the record.
        expected: u32,
        /// The checksum computed over the bytes read.
        actual: u32,
    },

    /// The recomputed Merkle root of a table differs from its Metadata component.
    #[error("Integrity mismatch: expected root {expected}, got {actual}")]
    IntegrityMismatch {
        /// Root stored in the Metadata component.
        expected: String,
        /// Root recomputed from the Data component.
        actual: String,
    },

    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The database is in an invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Returns true for errors that indicate on-disk data corruption
    /// detected by a checksum or the Merkle root.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::ChecksumMismatch { .. } | Error::IntegrityMismatch { .. })
    }
}
