//! Error types for replica backends.

use crate::mode::ReplicaMode;
use blockrep_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur in backend operations.
///
/// Errors fall into three groups:
/// - medium failures (`Storage` wrapping an I/O error, `Unresponsive`),
///   which the controller may retry after reopening the replica
/// - correctness faults (regressed counters, invalid transitions, unknown
///   or duplicate snapshots, bad sizes), which are never retried
/// - lifecycle misuse (`AlreadyExists`, `AlreadyClosed`, `Closed`)
#[derive(Debug, Error)]
pub enum BackendError {
    /// Storage medium error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A revision counter lower than the current one was requested.
    #[error("revision counter regression: current {current}, requested {requested}")]
    RevisionRegression {
        /// The current counter.
        current: u64,
        /// The rejected value.
        requested: u64,
    },

    /// The replica mode state machine does not allow this transition.
    #[error("invalid replica mode transition from {from} to {to}")]
    InvalidTransition {
        /// Current mode.
        from: ReplicaMode,
        /// Requested mode.
        to: ReplicaMode,
    },

    /// A snapshot with this name already exists in the chain.
    #[error("snapshot already exists: {name}")]
    DuplicateSnapshot {
        /// The snapshot name.
        name: String,
    },

    /// The snapshot is not part of the chain.
    #[error("unknown snapshot: {name}")]
    UnknownSnapshot {
        /// The snapshot name.
        name: String,
    },

    /// The snapshot name cannot be used.
    #[error("invalid snapshot name {name:?}: {reason}")]
    InvalidSnapshotName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The snapshot chain is full.
    #[error("snapshot limit reached: {max} snapshots")]
    SnapshotLimitReached {
        /// The configured limit.
        max: usize,
    },

    /// A size is invalid for this replica.
    #[error("invalid size: {message}")]
    InvalidSize {
        /// Description of the problem.
        message: String,
    },

    /// A resize named a different volume.
    #[error("volume mismatch: replica belongs to {expected}, request names {actual}")]
    VolumeMismatch {
        /// Volume recorded for the replica.
        expected: String,
        /// Volume named by the request.
        actual: String,
    },

    /// The current mode does not allow the operation.
    #[error("{operation} rejected in {mode} mode")]
    ModeRejected {
        /// Current mode.
        mode: ReplicaMode,
        /// The rejected operation.
        operation: &'static str,
    },

    /// The liveness probe did not confirm health in time.
    #[error("backend unresponsive: no answer within {timeout:?}")]
    Unresponsive {
        /// The probe deadline.
        timeout: Duration,
    },

    /// A backend is already bound to the address.
    #[error("backend already exists for {address}")]
    AlreadyExists {
        /// The contested address.
        address: String,
    },

    /// `close` was called on a closed backend.
    #[error("backend already closed")]
    AlreadyClosed,

    /// The backend is closed.
    #[error("backend is closed")]
    Closed,

    /// The monitor channel was already handed out or stopped.
    #[error("monitor channel unavailable")]
    MonitorUnavailable,

    /// No replica is attached at the address.
    #[error("no replica attached at {address}")]
    UnknownReplica {
        /// The address looked up.
        address: String,
    },

    /// The persisted metadata is invalid.
    #[error("invalid metadata format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl BackendError {
    /// Creates an invalid size error.
    pub fn invalid_size(message: impl Into<String>) -> Self {
        Self::InvalidSize {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an unknown snapshot error.
    pub fn unknown_snapshot(name: impl Into<String>) -> Self {
        Self::UnknownSnapshot { name: name.into() }
    }

    /// Returns true if the medium failed.
    ///
    /// A medium failure moves the replica to `Error` mode.
    pub fn is_medium_failure(&self) -> bool {
        match self {
            BackendError::Storage(e) => e.is_medium_failure(),
            BackendError::Unresponsive { .. } => true,
            _ => false,
        }
    }

    /// Returns true if the controller may retry, typically after closing
    /// and reopening the replica.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Storage(StorageError::Io(_)))
    }

    /// Returns true for programmer or protocol misuse that must surface to
    /// the controller as a correctness fault.
    pub fn is_correctness_fault(&self) -> bool {
        matches!(
            self,
            BackendError::RevisionRegression { .. }
                | BackendError::InvalidTransition { .. }
                | BackendError::DuplicateSnapshot { .. }
                | BackendError::UnknownSnapshot { .. }
                | BackendError::InvalidSnapshotName { .. }
                | BackendError::InvalidSize { .. }
                | BackendError::VolumeMismatch { .. }
        )
    }

    /// Returns true for lifecycle misuse.
    pub fn is_lifecycle_fault(&self) -> bool {
        matches!(
            self,
            BackendError::AlreadyExists { .. }
                | BackendError::AlreadyClosed
                | BackendError::Closed
                | BackendError::Storage(StorageError::Closed)
        )
    }
}
