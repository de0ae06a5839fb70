//! Error types for storage medium operations.

use std::io;
use thiserror::Error;

/// Result type for storage medium operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while talking to a storage medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying medium failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested byte range is outside the medium.
    #[error("range out of bounds: offset {offset}, len {len}, size {size}")]
    OutOfRange {
        /// The requested offset.
        offset: u64,
        /// The requested length.
        len: u64,
        /// The current medium size.
        size: u64,
    },

    /// Another owner holds the medium.
    #[error("medium is locked by another owner: {0}")]
    Locked(String),

    /// The medium has been released.
    #[error("medium is closed")]
    Closed,

    /// A point-in-time capture with this name already exists.
    #[error("capture already exists: {0}")]
    CaptureExists(String),

    /// No point-in-time capture with this name exists.
    #[error("capture not found: {0}")]
    CaptureMissing(String),

    /// Stored data is corrupted.
    #[error("medium corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Returns true if the error signals a failing medium rather than
    /// caller misuse or lifecycle state.
    #[must_use]
    pub fn is_medium_failure(&self) -> bool {
        matches!(self, StorageError::Io(_) | StorageError::Corrupted(_))
    }

    pub(crate) fn out_of_range(offset: u64, len: u64, size: u64) -> Self {
        Self::OutOfRange { offset, len, size }
    }
}

/// Checks that `[offset, offset + len)` fits in a medium of `size` bytes.
pub(crate) fn check_range(offset: u64, len: u64, size: u64) -> StorageResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::out_of_range(offset, len, size)),
    }
}
