//! Generic replica backend over any storage medium.

use crate::backend::{Backend, VolUsage};
use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::meta::{CloneStatus, ReplicaMeta, SnapshotInfo};
use crate::mode::ReplicaMode;
use crate::monitor::{self, MonitorEvent, MonitorReceiver, MonitorSender};
use blockrep_storage::{FileMedium, Medium, MemoryMedium, StorageError, StorageResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest accepted snapshot name.
const MAX_SNAPSHOT_NAME: usize = 255;

/// A replica stored in a directory on the local file system.
pub type FileBackend = Replica<FileMedium>;

/// A replica held in memory.
pub type MemoryBackend = Replica<MemoryMedium>;

/// A [`Backend`] implemented on top of a [`Medium`].
///
/// The medium supplies byte-range I/O, captures and one opaque metadata
/// record; `Replica` layers the consistency state on top and keeps it in
/// that record.
///
/// # Locking
///
/// A single metadata mutex is held across validate, persist and publish of
/// every metadata change, so the persisted record and the in-memory view
/// never disagree. Byte-range I/O does not take it.
pub struct Replica<M: Medium> {
    address: String,
    medium: Arc<M>,
    meta: Mutex<ReplicaMeta>,
    size: AtomicU64,
    sector_size: u64,
    max_snapshots: usize,
    ping_timeout: Duration,
    unsynced: AtomicU64,
    closed: AtomicBool,
    stale_read_warned: AtomicBool,
    monitor: MonitorSender,
    receiver: Mutex<Option<MonitorReceiver>>,
}

impl<M: Medium + 'static> Replica<M> {
    /// Opens a replica on `medium`, recovering its state or initialising a
    /// fresh one from `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig`, `InvalidFormat` for an unreadable metadata
    /// record, `InvalidSize` for raw data of unusable size, or a storage
    /// error.
    pub fn open(address: impl Into<String>, medium: M, config: &BackendConfig) -> BackendResult<Self> {
        config.validate()?;
        let address = address.into();

        let meta = match medium.load_metadata()? {
            Some(record) => {
                let meta = ReplicaMeta::decode(&record)?;
                let medium_size = medium.size()?;
                if medium_size != meta.size {
                    // Interrupted resize: the metadata record is authoritative.
                    warn!(
                        address = %address,
                        medium_size,
                        recorded_size = meta.size,
                        "medium size disagrees with metadata, restoring recorded size"
                    );
                    medium.set_size(meta.size)?;
                }
                meta
            }
            None => {
                let existing = medium.size()?;
                let size = if existing == 0 {
                    if config.volume_size > medium.max_size() {
                        return Err(BackendError::invalid_size(format!(
                            "volume size {} exceeds the medium limit of {} bytes",
                            config.volume_size,
                            medium.max_size()
                        )));
                    }
                    medium.set_size(config.volume_size)?;
                    config.volume_size
                } else if existing % config.sector_size == 0 {
                    existing
                } else {
                    return Err(BackendError::invalid_size(format!(
                        "existing data of {existing} bytes is not a multiple of sector size {}",
                        config.sector_size
                    )));
                };
                let meta = ReplicaMeta::new(size, config.sector_size, config.volume_name.clone());
                medium.store_metadata(&meta.encode()?)?;
                meta
            }
        };

        info!(
            address = %address,
            size = meta.size,
            sector_size = meta.sector_size,
            revision = meta.revision_counter,
            mode = %meta.mode,
            snapshots = meta.chain.len(),
            "opened replica"
        );

        let (tx, rx) = monitor::channel(config.monitor_capacity);
        Ok(Self {
            address,
            medium: Arc::new(medium),
            size: AtomicU64::new(meta.size),
            sector_size: meta.sector_size,
            meta: Mutex::new(meta),
            max_snapshots: config.max_snapshots,
            ping_timeout: config.ping_timeout,
            unsynced: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stale_read_warned: AtomicBool::new(false),
            monitor: tx,
            receiver: Mutex::new(Some(rx)),
        })
    }

    /// Returns the medium.
    #[must_use]
    pub fn medium(&self) -> &M {
        &self.medium
    }

    /// Returns a copy of the current metadata.
    #[must_use]
    pub fn metadata(&self) -> ReplicaMeta {
        self.meta.lock().clone()
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }

    fn persist(&self, meta: &ReplicaMeta) -> BackendResult<()> {
        self.medium
            .store_metadata(&meta.encode()?)
            .map_err(storage_error)
    }

    /// Routes a medium result through failure detection.
    fn io<T>(&self, result: StorageResult<T>) -> BackendResult<T> {
        self.observe(result.map_err(storage_error))
    }

    /// Moves the replica to `Error` mode if `result` is a medium failure.
    ///
    /// Must not be called with the metadata lock held.
    fn observe<T>(&self, result: BackendResult<T>) -> BackendResult<T> {
        if let Err(e) = &result {
            if e.is_medium_failure() {
                self.fail(&e.to_string());
            }
        }
        result
    }

    fn fail(&self, reason: &str) {
        let mut meta = self.meta.lock();
        let from = meta.mode;
        if from == ReplicaMode::Error {
            debug!(address = %self.address, reason, "further failure while in error mode");
            return;
        }

        // Error mode takes effect even if the medium cannot record it.
        meta.mode = ReplicaMode::Error;
        self.stale_read_warned.store(false, Ordering::SeqCst);
        self.monitor.emit(MonitorEvent::Failed {
            reason: reason.to_string(),
        });
        self.monitor.emit(MonitorEvent::ModeChanged {
            from,
            to: ReplicaMode::Error,
        });
        warn!(address = %self.address, reason, from = %from, "replica entered error mode");

        if let Err(e) = self.persist(&meta) {
            warn!(address = %self.address, error = %e, "could not persist error mode");
        }
    }

    fn commit<R>(&self, change: impl FnOnce(&mut ReplicaMeta) -> BackendResult<R>) -> BackendResult<R> {
        self.ensure_open()?;
        let result = {
            let mut meta = self.meta.lock();
            self.commit_locked(&mut meta, change)
        };
        self.observe(result)
    }

    /// Applies `change` to a copy, persists it, then publishes it.
    fn commit_locked<R>(
        &self,
        meta: &mut ReplicaMeta,
        change: impl FnOnce(&mut ReplicaMeta) -> BackendResult<R>,
    ) -> BackendResult<R> {
        // Callers may have waited on the lock while the replica was closed.
        self.ensure_open()?;
        let mut next = meta.clone();
        let value = change(&mut next)?;
        self.persist(&next)?;
        *meta = next;
        Ok(value)
    }

    fn change_mode(&self, to: ReplicaMode, recovery: bool) -> BackendResult<()> {
        self.ensure_open()?;
        let result = {
            let mut meta = self.meta.lock();
            self.change_mode_locked(&mut meta, to, recovery)
        };
        self.observe(result)
    }

    fn change_mode_locked(
        &self,
        meta: &mut ReplicaMeta,
        to: ReplicaMode,
        recovery: bool,
    ) -> BackendResult<()> {
        let from = meta.mode;
        let target = if recovery {
            from.recover(to)?
        } else {
            from.transition(to)?
        };
        if target == from {
            return Ok(());
        }

        self.commit_locked(meta, |next| {
            next.mode = target;
            Ok(())
        })?;
        self.stale_read_warned.store(false, Ordering::SeqCst);
        self.monitor.emit(MonitorEvent::ModeChanged { from, to: target });

        if recovery {
            warn!(address = %self.address, to = %target, "replica recovered from error mode");
        } else {
            info!(address = %self.address, from = %from, to = %target, "replica mode changed");
        }
        Ok(())
    }

    fn snapshot_locked(
        &self,
        meta: &mut ReplicaMeta,
        name: &str,
        user_created: bool,
        created: &str,
    ) -> BackendResult<()> {
        self.ensure_open()?;
        if meta.contains_snapshot(name) {
            return Err(BackendError::DuplicateSnapshot {
                name: name.to_string(),
            });
        }
        if meta.chain.len() >= self.max_snapshots {
            return Err(BackendError::SnapshotLimitReached {
                max: self.max_snapshots,
            });
        }
        if !meta.mode.accepts_writes() {
            return Err(BackendError::ModeRejected {
                mode: meta.mode,
                operation: "snapshot",
            });
        }

        match self.medium.capture(name) {
            Ok(()) => {}
            Err(StorageError::CaptureExists(_)) => {
                // Left behind by a snapshot whose metadata commit never landed.
                warn!(address = %self.address, snapshot = name, "replacing orphaned capture");
                self.medium.remove_capture(name).map_err(storage_error)?;
                self.medium.capture(name).map_err(storage_error)?;
            }
            Err(e) => return Err(storage_error(e)),
        }

        let entry = SnapshotInfo {
            name: name.to_string(),
            user_created,
            created: created.to_string(),
        };
        if let Err(e) = self.commit_locked(meta, |next| {
            next.chain.push(entry);
            Ok(())
        }) {
            if let Err(cleanup) = self.medium.remove_capture(name) {
                warn!(address = %self.address, snapshot = name, error = %cleanup, "could not remove capture after failed snapshot");
            }
            return Err(e);
        }
        Ok(())
    }

    fn resize_locked(
        &self,
        meta: &mut ReplicaMeta,
        name: &str,
        new_size: u64,
        truncate: bool,
    ) -> BackendResult<bool> {
        self.ensure_open()?;
        if let Some(volume) = &meta.volume_name {
            if volume != name {
                return Err(BackendError::VolumeMismatch {
                    expected: volume.clone(),
                    actual: name.to_string(),
                });
            }
        }
        if !meta.mode.accepts_writes() {
            return Err(BackendError::ModeRejected {
                mode: meta.mode,
                operation: "resize",
            });
        }
        if new_size == 0 || new_size % meta.sector_size != 0 {
            return Err(BackendError::invalid_size(format!(
                "{new_size} is not a non-zero multiple of sector size {}",
                meta.sector_size
            )));
        }
        if !truncate && new_size < meta.size {
            return Err(BackendError::invalid_size(format!(
                "cannot shrink from {} to {new_size} without truncate",
                meta.size
            )));
        }
        if truncate && new_size > meta.size {
            return Err(BackendError::invalid_size(format!(
                "cannot truncate from {} up to {new_size}",
                meta.size
            )));
        }
        if new_size > self.medium.max_size() {
            return Err(BackendError::invalid_size(format!(
                "{new_size} exceeds the medium limit of {} bytes",
                self.medium.max_size()
            )));
        }
        if new_size == meta.size {
            return Ok(false);
        }

        let old_size = meta.size;
        self.medium.set_size(new_size).map_err(storage_error)?;
        let committed = self.commit_locked(meta, |next| {
            next.size = new_size;
            next.volume_name.get_or_insert_with(|| name.to_string());
            Ok(())
        });
        if let Err(e) = committed {
            // A failed grow can be undone; truncated data is already gone.
            if !truncate {
                if let Err(undo) = self.medium.set_size(old_size) {
                    warn!(address = %self.address, error = %undo, "could not undo resize");
                }
            }
            return Err(e);
        }
        self.size.store(new_size, Ordering::SeqCst);
        Ok(true)
    }

    fn resize_with(&self, name: &str, new_size: u64, truncate: bool) -> BackendResult<()> {
        self.ensure_open()?;
        let result = {
            let mut meta = self.meta.lock();
            self.resize_locked(&mut meta, name, new_size, truncate)
        };
        if self.observe(result)? {
            info!(address = %self.address, volume = name, new_size, truncate, "resized replica");
        }
        Ok(())
    }
}

fn storage_error(e: StorageError) -> BackendError {
    match e {
        StorageError::Closed => BackendError::Closed,
        e => BackendError::Storage(e),
    }
}

fn validate_snapshot_name(name: &str) -> BackendResult<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.len() > MAX_SNAPSHOT_NAME {
        "longer than 255 bytes"
    } else if name == "." || name == ".." {
        "reserved"
    } else if name.contains(['/', '\\', '\0']) {
        "contains a path separator or NUL"
    } else {
        return Ok(());
    };
    Err(BackendError::InvalidSnapshotName {
        name: name.to_string(),
        reason,
    })
}

impl<M: Medium + 'static> Backend for Replica<M> {
    fn address(&self) -> &str {
        &self.address
    }

    fn read_at(&self, offset: u64, len: usize) -> BackendResult<Vec<u8>> {
        self.ensure_open()?;
        let mode = self.meta.lock().mode;
        if !mode.reads_consistent() && !self.stale_read_warned.swap(true, Ordering::SeqCst) {
            warn!(address = %self.address, mode = %mode, "serving reads that may be stale");
        }
        self.io(self.medium.read_at(offset, len))
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> BackendResult<usize> {
        self.ensure_open()?;
        // The write is ordered at this mode check. A transition that lands
        // while the bytes are in flight does not retract them.
        let mode = self.meta.lock().mode;
        if !mode.accepts_writes() {
            return Err(BackendError::ModeRejected {
                mode,
                operation: "write",
            });
        }

        let written = self.io(self.medium.write_at(offset, data))?;
        self.unsynced.fetch_add(written as u64, Ordering::SeqCst);

        let now = self.meta.lock().mode;
        if now != mode {
            warn!(
                address = %self.address,
                from = %mode,
                to = %now,
                offset,
                len = written,
                "mode changed while a write was in flight"
            );
        }
        Ok(written)
    }

    fn size(&self) -> BackendResult<u64> {
        self.ensure_open()?;
        Ok(self.size.load(Ordering::SeqCst))
    }

    fn sector_size(&self) -> BackendResult<u64> {
        self.ensure_open()?;
        Ok(self.sector_size)
    }

    fn snapshot(&self, name: &str, user_created: bool, created: &str) -> BackendResult<()> {
        validate_snapshot_name(name)?;
        self.ensure_open()?;
        let result = {
            let mut meta = self.meta.lock();
            self.snapshot_locked(&mut meta, name, user_created, created)
        };
        self.observe(result)?;

        info!(address = %self.address, snapshot = name, user_created, created, "created snapshot");
        Ok(())
    }

    fn resize(&self, name: &str, new_size: u64) -> BackendResult<()> {
        self.resize_with(name, new_size, false)
    }

    fn truncate(&self, name: &str, new_size: u64) -> BackendResult<()> {
        self.resize_with(name, new_size, true)
    }

    fn revision_counter(&self) -> BackendResult<u64> {
        self.ensure_open()?;
        Ok(self.meta.lock().revision_counter)
    }

    fn set_revision_counter(&self, counter: u64) -> BackendResult<()> {
        self.commit(|meta| {
            if counter < meta.revision_counter {
                return Err(BackendError::RevisionRegression {
                    current: meta.revision_counter,
                    requested: counter,
                });
            }
            meta.revision_counter = counter;
            Ok(())
        })?;
        debug!(address = %self.address, revision = counter, "set revision counter");
        Ok(())
    }

    fn reset_revision_counter(&self, counter: u64) -> BackendResult<()> {
        let previous = self.commit(|meta| {
            Ok(std::mem::replace(&mut meta.revision_counter, counter))
        })?;
        warn!(address = %self.address, previous, revision = counter, "reset revision counter");
        Ok(())
    }

    fn set_checkpoint(&self, snapshot: &str) -> BackendResult<()> {
        self.commit(|meta| {
            if !meta.contains_snapshot(snapshot) {
                return Err(BackendError::unknown_snapshot(snapshot));
            }
            meta.checkpoint = Some(snapshot.to_string());
            Ok(())
        })?;
        info!(address = %self.address, snapshot, "set checkpoint");
        Ok(())
    }

    fn checkpoint(&self) -> BackendResult<Option<String>> {
        self.ensure_open()?;
        Ok(self.meta.lock().checkpoint.clone())
    }

    fn replica_chain(&self) -> BackendResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.meta.lock().chain_names())
    }

    fn snapshot_info(&self, name: &str) -> BackendResult<SnapshotInfo> {
        self.ensure_open()?;
        self.meta
            .lock()
            .snapshot(name)
            .cloned()
            .ok_or_else(|| BackendError::unknown_snapshot(name))
    }

    fn replica_mode(&self) -> BackendResult<ReplicaMode> {
        self.ensure_open()?;
        Ok(self.meta.lock().mode)
    }

    fn set_replica_mode(&self, mode: ReplicaMode) -> BackendResult<()> {
        self.change_mode(mode, false)
    }

    fn acknowledge_recovery(&self, mode: ReplicaMode) -> BackendResult<()> {
        self.change_mode(mode, true)
    }

    fn set_rebuilding(&self, rebuilding: bool) -> BackendResult<()> {
        let mode = if rebuilding {
            ReplicaMode::Rebuilding
        } else {
            ReplicaMode::Normal
        };
        self.change_mode(mode, false)
    }

    fn remain_snapshots(&self) -> BackendResult<usize> {
        self.ensure_open()?;
        Ok(self.max_snapshots.saturating_sub(self.meta.lock().chain.len()))
    }

    fn vol_usage(&self) -> BackendResult<VolUsage> {
        self.ensure_open()?;
        let used_bytes = self.io(self.medium.allocated())?;
        Ok(VolUsage {
            used_bytes,
            total_bytes: self.size.load(Ordering::SeqCst),
            used_blocks: used_bytes.div_ceil(self.sector_size),
            sector_size: self.sector_size,
            revision_counter: self.meta.lock().revision_counter,
        })
    }

    fn clone_status(&self) -> BackendResult<CloneStatus> {
        self.ensure_open()?;
        Ok(self.meta.lock().clone_status)
    }

    fn set_clone_status(&self, status: CloneStatus) -> BackendResult<()> {
        self.commit(|meta| {
            meta.clone_status = status;
            Ok(())
        })?;
        debug!(address = %self.address, status = %status, "set clone status");
        Ok(())
    }

    fn monitor_channel(&self) -> BackendResult<MonitorReceiver> {
        self.ensure_open()?;
        self.receiver
            .lock()
            .take()
            .ok_or(BackendError::MonitorUnavailable)
    }

    fn stop_monitoring(&self) {
        self.monitor.close();
        self.receiver.lock().take();
        debug!(address = %self.address, "stopped monitoring");
    }

    fn ping_response(&self) -> BackendResult<()> {
        self.ensure_open()?;
        let timeout = self.ping_timeout;
        if self.meta.lock().mode == ReplicaMode::Error {
            return Err(BackendError::Unresponsive { timeout });
        }

        let (tx, rx) = mpsc::channel();
        let medium = Arc::clone(&self.medium);
        let spawned = thread::Builder::new()
            .name("blockrep-ping".into())
            .spawn(move || {
                let _ = tx.send(medium.probe());
            });
        if let Err(e) = spawned {
            return self.io(Err(StorageError::Io(e)));
        }

        match rx.recv_timeout(timeout) {
            Ok(probe) => self.io(probe),
            Err(_) => self.observe(Err(BackendError::Unresponsive { timeout })),
        }
    }

    fn sync(&self) -> BackendResult<u64> {
        self.ensure_open()?;
        let pending = self.unsynced.load(Ordering::SeqCst);
        self.io(self.medium.sync())?;
        self.unsynced.fetch_sub(pending, Ordering::SeqCst);
        Ok(pending)
    }

    fn unmap(&self, offset: u64, len: u64) -> BackendResult<u64> {
        self.ensure_open()?;
        let mode = self.meta.lock().mode;
        if !mode.accepts_writes() {
            return Err(BackendError::ModeRejected {
                mode,
                operation: "unmap",
            });
        }
        if len == 0 {
            return Ok(0);
        }
        self.io(self.medium.discard(offset, len))
    }

    fn close(&self) -> BackendResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BackendError::AlreadyClosed);
        }
        self.stop_monitoring();
        self.medium.release()?;
        info!(address = %self.address, "closed replica");
        Ok(())
    }
}

impl<M: Medium> fmt::Debug for Replica<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replica")
            .field("address", &self.address)
            .field("size", &self.size.load(Ordering::SeqCst))
            .field("sector_size", &self.sector_size)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<M: Medium> Drop for Replica<M> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.monitor.close();
            let _ = self.medium.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockrep_storage::{FaultyMedium, MemoryVolume};

    fn config() -> BackendConfig {
        BackendConfig::new()
            .volume_size(64 * 1024)
            .ping_timeout(Duration::from_millis(200))
    }

    fn memory_replica() -> MemoryBackend {
        Replica::open("mem://test", MemoryMedium::new(), &config()).unwrap()
    }

    fn faulty_replica() -> (Replica<FaultyMedium<MemoryMedium>>, Arc<blockrep_storage::Faults>) {
        let medium = FaultyMedium::new(MemoryMedium::new());
        let faults = medium.faults();
        let replica = Replica::open("mem://faulty", medium, &config()).unwrap();
        (replica, faults)
    }

    #[test]
    fn fresh_replica_state() {
        let replica = memory_replica();
        assert_eq!(replica.size().unwrap(), 64 * 1024);
        assert_eq!(replica.sector_size().unwrap(), 4096);
        assert_eq!(replica.revision_counter().unwrap(), 0);
        assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Normal);
        assert!(replica.replica_chain().unwrap().is_empty());
        assert!(replica.checkpoint().unwrap().is_none());
        assert_eq!(replica.remain_snapshots().unwrap(), 250);
        assert_eq!(replica.clone_status().unwrap(), CloneStatus::NotApplicable);
    }

    #[test]
    fn write_then_read() {
        let replica = memory_replica();
        assert_eq!(replica.write_at(4096, b"sector data").unwrap(), 11);
        assert_eq!(replica.read_at(4096, 11).unwrap(), b"sector data");
    }

    #[test]
    fn out_of_range_does_not_fail_replica() {
        let replica = memory_replica();
        let err = replica.read_at(64 * 1024, 1).unwrap_err();
        assert!(matches!(
            err,
            BackendError::Storage(StorageError::OutOfRange { .. })
        ));
        assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Normal);
    }

    #[test]
    fn revision_counter_rejects_regression() {
        let replica = memory_replica();
        replica.set_revision_counter(5).unwrap();
        replica.set_revision_counter(5).unwrap();

        let err = replica.set_revision_counter(3).unwrap_err();
        assert!(matches!(
            err,
            BackendError::RevisionRegression {
                current: 5,
                requested: 3
            }
        ));
        assert_eq!(replica.revision_counter().unwrap(), 5);

        replica.reset_revision_counter(1).unwrap();
        assert_eq!(replica.revision_counter().unwrap(), 1);
    }

    #[test]
    fn snapshot_appends_and_rejects_duplicates() {
        let replica = memory_replica();
        replica.snapshot("snap1", true, "t1").unwrap();
        replica.snapshot("snap2", false, "t2").unwrap();
        assert_eq!(replica.replica_chain().unwrap(), vec!["snap1", "snap2"]);

        let err = replica.snapshot("snap1", true, "t3").unwrap_err();
        assert!(matches!(err, BackendError::DuplicateSnapshot { .. }));
        assert_eq!(replica.replica_chain().unwrap(), vec!["snap1", "snap2"]);

        let info = replica.snapshot_info("snap2").unwrap();
        assert!(!info.user_created);
        assert_eq!(info.created, "t2");
    }

    #[test]
    fn snapshot_name_validation() {
        let replica = memory_replica();
        for name in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(
                replica.snapshot(name, true, "t"),
                Err(BackendError::InvalidSnapshotName { .. })
            ));
        }
        let long = "x".repeat(256);
        assert!(replica.snapshot(&long, true, "t").is_err());
        assert!(replica.replica_chain().unwrap().is_empty());
    }

    #[test]
    fn snapshot_limit() {
        let replica =
            Replica::open("mem://limit", MemoryMedium::new(), &config().max_snapshots(2)).unwrap();
        replica.snapshot("a", true, "t").unwrap();
        assert_eq!(replica.remain_snapshots().unwrap(), 1);
        replica.snapshot("b", true, "t").unwrap();
        assert_eq!(replica.remain_snapshots().unwrap(), 0);

        assert!(matches!(
            replica.snapshot("c", true, "t"),
            Err(BackendError::SnapshotLimitReached { max: 2 })
        ));
    }

    #[test]
    fn checkpoint_requires_chain_entry() {
        let replica = memory_replica();
        replica.snapshot("snap1", true, "t").unwrap();
        replica.set_checkpoint("snap1").unwrap();

        let err = replica.set_checkpoint("snap2").unwrap_err();
        assert!(matches!(err, BackendError::UnknownSnapshot { .. }));
        assert_eq!(replica.checkpoint().unwrap().as_deref(), Some("snap1"));
    }

    #[test]
    fn mode_transitions_emit_events() {
        let replica = memory_replica();
        let rx = replica.monitor_channel().unwrap();

        replica.set_rebuilding(true).unwrap();
        replica.set_rebuilding(true).unwrap();
        replica.set_replica_mode(ReplicaMode::Normal).unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                MonitorEvent::ModeChanged {
                    from: ReplicaMode::Normal,
                    to: ReplicaMode::Rebuilding
                },
                MonitorEvent::ModeChanged {
                    from: ReplicaMode::Rebuilding,
                    to: ReplicaMode::Normal
                },
            ]
        );
    }

    #[test]
    fn error_mode_requires_recovery() {
        let replica = memory_replica();
        replica.set_replica_mode(ReplicaMode::Error).unwrap();

        assert!(matches!(
            replica.set_replica_mode(ReplicaMode::Normal),
            Err(BackendError::InvalidTransition { .. })
        ));
        assert!(replica.set_rebuilding(false).is_err());
        assert!(matches!(
            replica.write_at(0, b"x"),
            Err(BackendError::ModeRejected { .. })
        ));
        assert!(replica.read_at(0, 1).is_ok());

        replica.acknowledge_recovery(ReplicaMode::Normal).unwrap();
        assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Normal);
        assert!(replica.write_at(0, b"x").is_ok());
    }

    #[test]
    fn io_failure_enters_error_mode_and_signals_first() {
        let (replica, faults) = faulty_replica();
        let rx = replica.monitor_channel().unwrap();

        faults.fail_io(true);
        let err = replica.write_at(0, b"data").unwrap_err();
        assert!(err.is_medium_failure());

        // The events are already queued by the time the error is returned.
        assert!(matches!(rx.try_recv().unwrap(), MonitorEvent::Failed { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            MonitorEvent::ModeChanged {
                from: ReplicaMode::Normal,
                to: ReplicaMode::Error
            }
        );
        assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Error);

        faults.fail_io(false);
        assert!(matches!(
            replica.write_at(0, b"data"),
            Err(BackendError::ModeRejected { .. })
        ));
    }

    #[test]
    fn failed_capture_leaves_chain_unchanged() {
        let (replica, faults) = faulty_replica();
        faults.fail_captures(true);

        assert!(replica.snapshot("snap1", true, "t").is_err());
        assert!(replica.replica_chain().unwrap().is_empty());
        assert!(!replica.medium().has_capture("snap1").unwrap());
    }

    #[test]
    fn failed_metadata_commit_removes_capture() {
        let (replica, faults) = faulty_replica();
        faults.fail_metadata(true);

        assert!(replica.snapshot("snap1", true, "t").is_err());
        assert!(replica.metadata().chain.is_empty());
        assert!(!replica.medium().has_capture("snap1").unwrap());
    }

    #[test]
    fn failed_counter_commit_keeps_old_value() {
        let (replica, faults) = faulty_replica();
        replica.set_revision_counter(7).unwrap();

        faults.fail_metadata(true);
        assert!(replica.set_revision_counter(9).is_err());
        faults.fail_metadata(false);

        assert_eq!(replica.revision_counter().unwrap(), 7);
    }

    #[test]
    fn orphaned_capture_is_replaced() {
        let medium = MemoryMedium::new();
        medium.set_size(4096).unwrap();
        medium.capture("snap1").unwrap();

        let replica = Replica::open("mem://orphan", medium, &config()).unwrap();
        replica.snapshot("snap1", true, "t").unwrap();
        assert_eq!(replica.replica_chain().unwrap(), vec!["snap1"]);
    }

    #[test]
    fn ping_detects_stall() {
        let (replica, faults) = faulty_replica();
        assert!(replica.ping_response().is_ok());

        faults.stall_probe(Some(Duration::from_millis(500)));
        let err = replica.ping_response().unwrap_err();
        assert!(matches!(err, BackendError::Unresponsive { .. }));
        assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Error);
    }

    #[test]
    fn resize_grows_and_rejects_shrink() {
        let replica = memory_replica();
        replica.resize("vol1", 128 * 1024).unwrap();
        assert_eq!(replica.size().unwrap(), 128 * 1024);
        assert_eq!(replica.metadata().volume_name.as_deref(), Some("vol1"));

        assert!(matches!(
            replica.resize("vol1", 64 * 1024),
            Err(BackendError::InvalidSize { .. })
        ));
        assert!(matches!(
            replica.resize("vol1", 128 * 1024 + 1),
            Err(BackendError::InvalidSize { .. })
        ));
        assert!(matches!(
            replica.resize("other", 256 * 1024),
            Err(BackendError::VolumeMismatch { .. })
        ));
    }

    #[test]
    fn resize_beyond_medium_limit_is_invalid_size() {
        let replica = memory_replica();
        let huge = (u64::MAX / 4096) * 4096;

        assert!(matches!(
            replica.resize("vol1", huge),
            Err(BackendError::InvalidSize { .. })
        ));
        assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Normal);
        assert_eq!(replica.size().unwrap(), 64 * 1024);
        assert_eq!(replica.write_at(0, b"still writable").unwrap(), 14);
    }

    #[test]
    fn file_resize_beyond_medium_limit_is_invalid_size() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium::open(&dir.path().join("vol1")).unwrap();
        let replica = Replica::open("vol1", medium, &config()).unwrap();
        let huge = (u64::MAX / 4096) * 4096;

        assert!(matches!(
            replica.resize("vol1", huge),
            Err(BackendError::InvalidSize { .. })
        ));
        assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Normal);
        assert_eq!(replica.write_at(0, b"ok").unwrap(), 2);
    }

    #[test]
    fn oversized_volume_config_is_invalid_size() {
        let config = config().volume_size((u64::MAX / 4096) * 4096);
        let result = Replica::open("mem://huge", MemoryMedium::new(), &config);
        assert!(matches!(result, Err(BackendError::InvalidSize { .. })));
    }

    #[test]
    fn close_fails_calls_waiting_on_metadata() {
        let volume = MemoryVolume::new();
        let medium = FaultyMedium::new(MemoryMedium::bind(Arc::clone(&volume), "mem://vol").unwrap());
        let faults = medium.faults();
        let replica = Arc::new(Replica::open("mem://vol", medium, &config()).unwrap());
        faults.stall_metadata(Some(Duration::from_millis(500)));

        let stalled = {
            let replica = Arc::clone(&replica);
            thread::spawn(move || replica.set_revision_counter(7))
        };
        thread::sleep(Duration::from_millis(100));
        let waiting = {
            let replica = Arc::clone(&replica);
            thread::spawn(move || replica.set_revision_counter(9))
        };
        thread::sleep(Duration::from_millis(100));

        replica.close().unwrap();
        assert!(matches!(stalled.join().unwrap(), Err(BackendError::Closed)));
        assert!(matches!(waiting.join().unwrap(), Err(BackendError::Closed)));

        let reopened = MemoryMedium::bind(volume, "mem://vol").unwrap();
        let replica = Replica::open("mem://vol", reopened, &config()).unwrap();
        assert_eq!(replica.revision_counter().unwrap(), 0);
    }

    #[test]
    fn truncate_shrinks_explicitly() {
        let replica = memory_replica();
        replica.truncate("vol1", 8192).unwrap();
        assert_eq!(replica.size().unwrap(), 8192);
        assert!(replica.read_at(8192, 1).is_err());
        assert!(replica.truncate("vol1", 16384).is_err());
    }

    #[test]
    fn sync_reports_unsynced_bytes() {
        let replica = memory_replica();
        replica.write_at(0, &[1u8; 100]).unwrap();
        replica.write_at(200, &[2u8; 50]).unwrap();

        assert_eq!(replica.sync().unwrap(), 150);
        assert_eq!(replica.sync().unwrap(), 0);
    }

    #[test]
    fn unmap_zeroes_and_usage_tracks() {
        let replica = memory_replica();
        replica.write_at(0, &[7u8; 8192]).unwrap();

        let usage = replica.vol_usage().unwrap();
        assert_eq!(usage.used_bytes, 8192);
        assert_eq!(usage.used_blocks, 2);
        assert_eq!(usage.total_bytes, 64 * 1024);

        assert_eq!(replica.unmap(0, 4096).unwrap(), 4096);
        assert_eq!(replica.read_at(0, 4096).unwrap(), vec![0u8; 4096]);
        assert_eq!(replica.vol_usage().unwrap().used_blocks, 1);
    }

    #[test]
    fn monitor_channel_is_handed_out_once() {
        let replica = memory_replica();
        let _rx = replica.monitor_channel().unwrap();
        assert!(matches!(
            replica.monitor_channel(),
            Err(BackendError::MonitorUnavailable)
        ));
    }

    #[test]
    fn stop_monitoring_closes_channel() {
        let replica = memory_replica();
        let rx = replica.monitor_channel().unwrap();

        replica.stop_monitoring();
        replica.set_rebuilding(true).unwrap();
        assert_eq!(rx.recv(), None);
    }

    #[test]
    fn close_twice_fails_and_blocks_operations() {
        let replica = memory_replica();
        replica.close().unwrap();

        assert!(matches!(replica.close(), Err(BackendError::AlreadyClosed)));
        assert!(matches!(replica.read_at(0, 1), Err(BackendError::Closed)));
        assert!(matches!(replica.size(), Err(BackendError::Closed)));
        assert!(matches!(replica.ping_response(), Err(BackendError::Closed)));
    }

    #[test]
    fn state_survives_reopen() {
        let volume = MemoryVolume::new();
        {
            let medium = MemoryMedium::bind(Arc::clone(&volume), "mem://vol").unwrap();
            let replica = Replica::open("mem://vol", medium, &config()).unwrap();
            replica.write_at(0, b"durable").unwrap();
            replica.snapshot("snap1", true, "t").unwrap();
            replica.set_checkpoint("snap1").unwrap();
            replica.set_revision_counter(11).unwrap();
            replica.set_rebuilding(true).unwrap();
            replica.close().unwrap();
        }

        let medium = MemoryMedium::bind(volume, "mem://vol").unwrap();
        let replica = Replica::open("mem://vol", medium, &config()).unwrap();
        assert_eq!(replica.read_at(0, 7).unwrap(), b"durable");
        assert_eq!(replica.replica_chain().unwrap(), vec!["snap1"]);
        assert_eq!(replica.checkpoint().unwrap().as_deref(), Some("snap1"));
        assert_eq!(replica.revision_counter().unwrap(), 11);
        assert_eq!(replica.replica_mode().unwrap(), ReplicaMode::Rebuilding);
    }

    #[test]
    fn preexisting_data_of_odd_size_is_rejected() {
        let volume = MemoryVolume::with_data(vec![0u8; 1000]);
        let medium = MemoryMedium::bind(volume, "mem://odd").unwrap();
        assert!(matches!(
            Replica::open("mem://odd", medium, &config()),
            Err(BackendError::InvalidSize { .. })
        ));
    }
}
