//! In-memory medium for tests and ephemeral volumes.

use crate::error::{check_range, StorageError, StorageResult};
use crate::medium::Medium;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The storage behind one or more successive [`MemoryMedium`] handles.
///
/// A volume outlives the handles bound to it, which lets tests close and
/// reopen a replica the way they would with a disk. At most one handle is
/// bound at a time.
#[derive(Debug, Default)]
pub struct MemoryVolume {
    data: RwLock<Vec<u8>>,
    captures: RwLock<BTreeMap<String, Vec<u8>>>,
    metadata: RwLock<Option<Vec<u8>>>,
    bound: AtomicBool,
}

impl MemoryVolume {
    /// Creates a new empty volume.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a volume with pre-existing live data.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: RwLock::new(data),
            ..Self::default()
        })
    }

    /// Returns true while a medium handle is bound to this volume.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    /// Returns a copy of the live data.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Returns a copy of the capture named `name`.
    #[must_use]
    pub fn capture_data(&self, name: &str) -> Option<Vec<u8>> {
        self.captures.read().get(name).cloned()
    }
}

/// A medium handle bound to a [`MemoryVolume`].
///
/// # Example
///
/// ```rust
/// use blockrep_storage::{Medium, MemoryMedium};
///
/// let medium = MemoryMedium::new();
/// medium.set_size(4096).unwrap();
/// medium.write_at(0, b"test data").unwrap();
/// assert_eq!(medium.read_at(0, 9).unwrap(), b"test data");
/// ```
#[derive(Debug)]
pub struct MemoryMedium {
    volume: Arc<MemoryVolume>,
    released: AtomicBool,
}

impl MemoryMedium {
    /// Creates a medium over a fresh, unshared volume.
    #[must_use]
    pub fn new() -> Self {
        Self {
            volume: MemoryVolume::new(),
            released: AtomicBool::new(false),
        }
        .bound()
    }

    /// Binds a medium to an existing volume.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another handle is bound to the volume.
    pub fn bind(volume: Arc<MemoryVolume>, label: &str) -> StorageResult<Self> {
        if volume
            .bound
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StorageError::Locked(label.to_string()));
        }
        Ok(Self {
            volume,
            released: AtomicBool::new(false),
        })
    }

    /// Returns the volume behind this handle.
    #[must_use]
    pub fn volume(&self) -> &Arc<MemoryVolume> {
        &self.volume
    }

    fn bound(self) -> Self {
        self.volume.bound.store(true, Ordering::SeqCst);
        self
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryMedium {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.volume.bound.store(false, Ordering::SeqCst);
        }
    }
}

impl Medium for MemoryMedium {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.ensure_open()?;
        let data = self.volume.data.read();
        check_range(offset, len as u64, data.len() as u64)?;

        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> StorageResult<usize> {
        self.ensure_open()?;
        let mut data = self.volume.data.write();
        check_range(offset, bytes.len() as u64, data.len() as u64)?;

        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn size(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        Ok(self.volume.data.read().len() as u64)
    }

    fn max_size(&self) -> u64 {
        isize::MAX as u64
    }

    fn set_size(&self, new_size: u64) -> StorageResult<()> {
        self.ensure_open()?;
        let new_size = usize::try_from(new_size).map_err(|_| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("size {new_size} does not fit in memory"),
            ))
        })?;
        let mut data = self.volume.data.write();
        if let Some(additional) = new_size.checked_sub(data.len()) {
            data.try_reserve_exact(additional).map_err(|e| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::OutOfMemory,
                    format!("cannot grow to {new_size} bytes: {e}"),
                ))
            })?;
        }
        data.resize(new_size, 0);
        Ok(())
    }

    fn allocated(&self) -> StorageResult<u64> {
        self.ensure_open()?;
        let data = self.volume.data.read();
        Ok(data.iter().filter(|&&b| b != 0).count() as u64)
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        self.ensure_open()
    }

    fn sync(&self) -> StorageResult<()> {
        self.ensure_open()
    }

    fn discard(&self, offset: u64, len: u64) -> StorageResult<u64> {
        self.ensure_open()?;
        let mut data = self.volume.data.write();
        check_range(offset, len, data.len() as u64)?;

        let start = offset as usize;
        data[start..start + len as usize].fill(0);
        Ok(len)
    }

    fn probe(&self) -> StorageResult<()> {
        self.ensure_open()
    }

    fn capture(&self, name: &str) -> StorageResult<()> {
        self.ensure_open()?;
        let data = self.volume.data.read();
        let mut captures = self.volume.captures.write();
        if captures.contains_key(name) {
            return Err(StorageError::CaptureExists(name.to_string()));
        }
        captures.insert(name.to_string(), data.clone());
        Ok(())
    }

    fn remove_capture(&self, name: &str) -> StorageResult<()> {
        self.ensure_open()?;
        self.volume
            .captures
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::CaptureMissing(name.to_string()))
    }

    fn has_capture(&self, name: &str) -> StorageResult<bool> {
        self.ensure_open()?;
        Ok(self.volume.captures.read().contains_key(name))
    }

    fn load_metadata(&self) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.volume.metadata.read().clone())
    }

    fn store_metadata(&self, record: &[u8]) -> StorageResult<()> {
        self.ensure_open()?;
        *self.volume.metadata.write() = Some(record.to_vec());
        Ok(())
    }

    fn release(&self) -> StorageResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        self.volume.bound.store(false, Ordering::SeqCst);
        Ok(())
    }
}
