//! Storage medium trait definition.

use crate::error::StorageResult;

/// The minimal capability set a replica needs from its physical storage.
///
/// A medium is an **opaque byte store** of fixed logical length plus two
/// side channels: named point-in-time captures and one opaque metadata
/// record. It knows nothing about revision counters, snapshot chains or
/// replica modes; the backend layer owns all of that.
///
/// # Invariants
///
/// - `read_at` returns exactly the bytes last written to that range
/// - byte-range I/O is serialised, so a concurrent reader observes every
///   sector either entirely before or entirely after a write
/// - `store_metadata` is atomic: after a crash, `load_metadata` returns
///   either the previous record or the new one, never a mix
/// - after `release`, every operation fails with `StorageError::Closed`
///
/// # Implementors
///
/// - [`super::FileMedium`] - directory on a local file system
/// - [`super::MemoryMedium`] - in-process, for tests and ephemeral volumes
/// - `FaultyMedium` - fault-injecting wrapper, behind the `testing` feature
pub trait Medium: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if the range extends past the medium size,
    /// or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` at `offset` and returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if the range extends past the medium size,
    /// or an I/O error.
    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<usize>;

    /// Returns the logical size of the medium in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Returns the largest logical size the medium can represent.
    fn max_size(&self) -> u64;

    /// Sets the logical size. Growing exposes zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the medium cannot hold `new_size` bytes.
    fn set_size(&self, new_size: u64) -> StorageResult<()>;

    /// Returns the number of bytes physically allocated for live data.
    fn allocated(&self) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&self) -> StorageResult<()>;

    /// Makes all data and metadata durable.
    fn sync(&self) -> StorageResult<()>;

    /// Deallocates a byte range. Subsequent reads of the range return zeros.
    ///
    /// Returns the number of bytes discarded.
    fn discard(&self, offset: u64, len: u64) -> StorageResult<u64>;

    /// Confirms the medium is reachable. May block on the device.
    fn probe(&self) -> StorageResult<()>;

    /// Materialises a point-in-time capture of the live data named `name`.
    ///
    /// # Errors
    ///
    /// Returns `CaptureExists` if a capture with that name is already present.
    fn capture(&self, name: &str) -> StorageResult<()>;

    /// Removes the capture named `name`.
    fn remove_capture(&self, name: &str) -> StorageResult<()>;

    /// Returns true if a capture named `name` exists.
    fn has_capture(&self, name: &str) -> StorageResult<bool>;

    /// Loads the metadata record, or `None` for a fresh medium.
    fn load_metadata(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the metadata record.
    fn store_metadata(&self, record: &[u8]) -> StorageResult<()>;

    /// Releases the medium so another owner may bind it.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the medium was already released.
    fn release(&self) -> StorageResult<()>;
}
