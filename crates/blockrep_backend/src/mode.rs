//! Replica operating modes and the transitions between them.
//!
//! ```text
//!            set_replica_mode / set_rebuilding
//!   Normal <-------------------------------> Rebuilding
//!      \                                       /
//!       \  I/O failure, failed ping,          /
//!        \ set_replica_mode(Error)           /
//!         v                                 v
//!                       Error
//!                         |
//!                         | acknowledge_recovery only
//!                         v
//!               Normal or Rebuilding
//! ```

use crate::error::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplicaMode {
    /// Serves reads and writes; counted as consistent.
    Normal,
    /// Accepts writes to catch up with the group; reads may be stale.
    Rebuilding,
    /// Rejects writes; reads are served for diagnostics only.
    Error,
}

impl ReplicaMode {
    /// Returns true if writes are accepted in this mode.
    pub fn accepts_writes(self) -> bool {
        matches!(self, ReplicaMode::Normal | ReplicaMode::Rebuilding)
    }

    /// Returns true if reads in this mode are guaranteed consistent.
    pub fn reads_consistent(self) -> bool {
        self == ReplicaMode::Normal
    }

    /// Validates a controller-initiated transition to `to`.
    ///
    /// Returns the new mode. Staying in the same mode is allowed. Leaving
    /// `Error` is never allowed here; see [`ReplicaMode::recover`].
    pub fn transition(self, to: ReplicaMode) -> BackendResult<ReplicaMode> {
        use ReplicaMode::{Error, Normal, Rebuilding};

        match (self, to) {
            (from, to) if from == to => Ok(to),
            (Normal, Rebuilding) | (Rebuilding, Normal) => Ok(to),
            (Normal | Rebuilding, Error) => Ok(Error),
            (from, to) => Err(BackendError::InvalidTransition { from, to }),
        }
    }

    /// Validates an explicit recovery out of `Error` into `to`.
    pub fn recover(self, to: ReplicaMode) -> BackendResult<ReplicaMode> {
        match (self, to) {
            (ReplicaMode::Error, ReplicaMode::Normal | ReplicaMode::Rebuilding) => Ok(to),
            (from, to) => Err(BackendError::InvalidTransition { from, to }),
        }
    }

    /// Returns the mode name.
    pub fn as_str(self) -> &'static str {
        match self {
            ReplicaMode::Normal => "Normal",
            ReplicaMode::Rebuilding => "Rebuilding",
            ReplicaMode::Error => "Error",
        }
    }
}

impl Default for ReplicaMode {
    fn default() -> Self {
        ReplicaMode::Normal
    }
}

impl fmt::Display for ReplicaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
