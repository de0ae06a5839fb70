//! Fault-injecting medium wrapper.
//!
//! Wraps any [`Medium`] and fails or stalls selected operations on demand.
//! Used to exercise failure handling above the medium: error-mode
//! transitions, atomic snapshot rollback and liveness probe timeouts.

use crate::error::{StorageError, StorageResult};
use crate::medium::Medium;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Switches controlling which operations of a [`FaultyMedium`] fail.
///
/// Shared through an `Arc` so a test can flip faults after the medium has
/// been handed to its owner.
#[derive(Debug, Default)]
pub struct Faults {
    io: AtomicBool,
    metadata: AtomicBool,
    captures: AtomicBool,
    probe_stall: Mutex<Option<Duration>>,
    metadata_stall: Mutex<Option<Duration>>,
}

impl Faults {
    /// Fails byte-range I/O, flush, sync and probes.
    pub fn fail_io(&self, enabled: bool) {
        self.io.store(enabled, Ordering::SeqCst);
    }

    /// Fails metadata stores.
    pub fn fail_metadata(&self, enabled: bool) {
        self.metadata.store(enabled, Ordering::SeqCst);
    }

    /// Fails point-in-time captures.
    pub fn fail_captures(&self, enabled: bool) {
        self.captures.store(enabled, Ordering::SeqCst);
    }

    /// Makes `probe` sleep for `stall` before answering.
    pub fn stall_probe(&self, stall: Option<Duration>) {
        *self.probe_stall.lock() = stall;
    }

    /// Makes metadata stores sleep for `stall` before writing.
    pub fn stall_metadata(&self, stall: Option<Duration>) {
        *self.metadata_stall.lock() = stall;
    }

    fn check(flag: &AtomicBool, operation: &str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("injected fault during {operation}"),
            )));
        }
        Ok(())
    }
}

/// A [`Medium`] wrapper with injectable faults.
#[derive(Debug)]
pub struct FaultyMedium<M> {
    inner: M,
    faults: Arc<Faults>,
}

impl<M: Medium> FaultyMedium<M> {
    /// Wraps `inner` with all faults disabled.
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Returns the fault switches.
    #[must_use]
    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }

    /// Returns the wrapped medium.
    #[must_use]
    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M: Medium> Medium for FaultyMedium<M> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        Faults::check(&self.faults.io, "read")?;
        self.inner.read_at(offset, len)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<usize> {
        Faults::check(&self.faults.io, "write")?;
        self.inner.write_at(offset, data)
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn max_size(&self) -> u64 {
        self.inner.max_size()
    }

    fn set_size(&self, new_size: u64) -> StorageResult<()> {
        Faults::check(&self.faults.io, "resize")?;
        self.inner.set_size(new_size)
    }

    fn allocated(&self) -> StorageResult<u64> {
        self.inner.allocated()
    }

    fn flush(&self) -> StorageResult<()> {
        Faults::check(&self.faults.io, "flush")?;
        self.inner.flush()
    }

    fn sync(&self) -> StorageResult<()> {
        Faults::check(&self.faults.io, "sync")?;
        self.inner.sync()
    }

    fn discard(&self, offset: u64, len: u64) -> StorageResult<u64> {
        Faults::check(&self.faults.io, "discard")?;
        self.inner.discard(offset, len)
    }

    fn probe(&self) -> StorageResult<()> {
        let stall = *self.faults.probe_stall.lock();
        if let Some(stall) = stall {
            thread::sleep(stall);
        }
        Faults::check(&self.faults.io, "probe")?;
        self.inner.probe()
    }

    fn capture(&self, name: &str) -> StorageResult<()> {
        Faults::check(&self.faults.captures, "capture")?;
        self.inner.capture(name)
    }

    fn remove_capture(&self, name: &str) -> StorageResult<()> {
        self.inner.remove_capture(name)
    }

    fn has_capture(&self, name: &str) -> StorageResult<bool> {
        self.inner.has_capture(name)
    }

    fn load_metadata(&self) -> StorageResult<Option<Vec<u8>>> {
        self.inner.load_metadata()
    }

    fn store_metadata(&self, record: &[u8]) -> StorageResult<()> {
        let stall = *self.faults.metadata_stall.lock();
        if let Some(stall) = stall {
            thread::sleep(stall);
        }
        Faults::check(&self.faults.metadata, "metadata store")?;
        self.inner.store_metadata(record)
    }

    fn release(&self) -> StorageResult<()> {
        self.inner.release()
    }
}
