//! The backend contract every replica storage implementation satisfies.

use crate::error::BackendResult;
use crate::meta::{CloneStatus, SnapshotInfo};
use crate::mode::ReplicaMode;
use crate::monitor::MonitorReceiver;
use serde::Serialize;
use std::fmt;

/// Space accounting for a replica. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VolUsage {
    /// Bytes physically allocated for live data.
    pub used_bytes: u64,
    /// Logical volume size.
    pub total_bytes: u64,
    /// `used_bytes` in sectors, rounded up.
    pub used_blocks: u64,
    /// Sector size.
    pub sector_size: u64,
    /// Revision counter at the time of the call.
    pub revision_counter: u64,
}

/// One storage replica as seen by a controller.
///
/// A backend couples byte-range I/O on its medium with the consistency state
/// the controller relies on: revision counter, snapshot chain, checkpoint,
/// replica mode and the monitor channel.
///
/// # Invariants
///
/// - `revision_counter` never decreases except through
///   `reset_revision_counter`
/// - the snapshot chain only grows at the end and never repeats a name
/// - the checkpoint, when set, names a chain entry
/// - writes are rejected in [`ReplicaMode::Error`], and leaving `Error`
///   requires `acknowledge_recovery`
/// - a transition into `Error` is announced on the monitor channel before
///   the failing call returns
/// - metadata changes are durable on the medium before they are visible
///
/// # Concurrency
///
/// All methods take `&self`. Reads of geometry, chain and usage may run
/// concurrently with writes and observe either the old or the new state.
/// Ordering-sensitive sequences (write then bump the revision counter, mode
/// changes, snapshots) must be serialised by the controller.
///
/// A write takes effect at its mode check. A write admitted in a writable
/// mode completes even if the replica leaves that mode before the bytes
/// reach the medium; writes checked after the transition are rejected.
/// `close` fails any call still waiting on the metadata lock with `Closed`.
pub trait Backend: Send + Sync + fmt::Debug {
    /// Returns the address the backend is bound to.
    fn address(&self) -> &str;

    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the range is out of bounds or the medium
    /// fails. A medium failure moves the replica to `Error` mode.
    fn read_at(&self, offset: u64, len: usize) -> BackendResult<Vec<u8>>;

    /// Writes `data` at `offset` and returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns `ModeRejected` in `Error` mode, or a storage error.
    /// The mode is checked once, before the bytes are handed to the medium.
    fn write_at(&self, offset: u64, data: &[u8]) -> BackendResult<usize>;

    /// Returns the logical size in bytes.
    fn size(&self) -> BackendResult<u64>;

    /// Returns the sector size in bytes.
    fn sector_size(&self) -> BackendResult<u64>;

    /// Captures the live data and appends `name` to the snapshot chain.
    ///
    /// Atomic: either the chain gains exactly one entry and the capture
    /// exists, or neither.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSnapshot`, `InvalidSnapshotName`,
    /// `SnapshotLimitReached`, or a storage error.
    fn snapshot(&self, name: &str, user_created: bool, created: &str) -> BackendResult<()>;

    /// Grows the volume named `name` to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSize` when shrinking or when `new_size` is not a
    /// multiple of the sector size, `VolumeMismatch` when `name` is not
    /// the replica's volume.
    fn resize(&self, name: &str, new_size: u64) -> BackendResult<()>;

    /// Shrinks the volume named `name` to `new_size` bytes, discarding data
    /// past the new end.
    fn truncate(&self, name: &str, new_size: u64) -> BackendResult<()>;

    /// Returns the revision counter.
    fn revision_counter(&self) -> BackendResult<u64>;

    /// Advances the revision counter to `counter`.
    ///
    /// # Errors
    ///
    /// Returns `RevisionRegression` if `counter` is below the current value.
    fn set_revision_counter(&self, counter: u64) -> BackendResult<()>;

    /// Sets the revision counter unconditionally, for a new volume lifecycle.
    fn reset_revision_counter(&self, counter: u64) -> BackendResult<()>;

    /// Marks `snapshot` as the last snapshot durable across the group.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSnapshot` if `snapshot` is not in the chain.
    fn set_checkpoint(&self, snapshot: &str) -> BackendResult<()>;

    /// Returns the checkpoint, if one was set.
    fn checkpoint(&self) -> BackendResult<Option<String>>;

    /// Returns the snapshot chain, oldest first, as of the call.
    fn replica_chain(&self) -> BackendResult<Vec<String>>;

    /// Returns the chain entry named `name`.
    fn snapshot_info(&self, name: &str) -> BackendResult<SnapshotInfo>;

    /// Returns the current mode.
    fn replica_mode(&self) -> BackendResult<ReplicaMode>;

    /// Moves to `mode`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for transitions the state machine forbids,
    /// including any transition out of `Error`.
    fn set_replica_mode(&self, mode: ReplicaMode) -> BackendResult<()>;

    /// Leaves `Error` for `mode` on explicit operator or controller request.
    fn acknowledge_recovery(&self, mode: ReplicaMode) -> BackendResult<()>;

    /// Enters (`true`) or leaves (`false`) `Rebuilding`.
    fn set_rebuilding(&self, rebuilding: bool) -> BackendResult<()>;

    /// Returns how many more snapshots the chain accepts.
    fn remain_snapshots(&self) -> BackendResult<usize>;

    /// Returns space accounting.
    fn vol_usage(&self) -> BackendResult<VolUsage>;

    /// Returns the clone progress.
    fn clone_status(&self) -> BackendResult<CloneStatus>;

    /// Records clone progress.
    fn set_clone_status(&self, status: CloneStatus) -> BackendResult<()>;

    /// Hands out the consuming half of the monitor channel.
    ///
    /// # Errors
    ///
    /// Returns `MonitorUnavailable` if it was already taken or monitoring
    /// was stopped.
    fn monitor_channel(&self) -> BackendResult<MonitorReceiver>;

    /// Stops emitting monitor events and closes the channel.
    fn stop_monitoring(&self);

    /// Confirms the backend is healthy within the configured deadline.
    ///
    /// # Errors
    ///
    /// Returns `Unresponsive` and moves to `Error` mode if health cannot be
    /// confirmed in time.
    fn ping_response(&self) -> BackendResult<()>;

    /// Makes buffered writes durable and returns how many bytes were written
    /// since the previous sync.
    fn sync(&self) -> BackendResult<u64>;

    /// Deallocates a byte range and returns the number of bytes unmapped.
    fn unmap(&self, offset: u64, len: u64) -> BackendResult<u64>;

    /// Releases the medium.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyClosed` on a second call.
    fn close(&self) -> BackendResult<()>;
}
