//! Persisted replica metadata.
//!
//! Everything a replica must recover after a crash lives in one record:
//! geometry, revision counter, mode, snapshot chain, checkpoint and clone
//! status. The record is framed as
//!
//! ```text
//! magic "BRMT" | u16 LE format version | CBOR payload
//! ```

use crate::error::{BackendError, BackendResult};
use crate::mode::ReplicaMode;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Magic bytes for the metadata record.
pub const META_MAGIC: [u8; 4] = *b"BRMT";

/// Current metadata format version.
pub const META_VERSION: u16 = 1;

const HEADER_LEN: usize = 6;

/// One entry of the snapshot chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot name, unique within the replica.
    pub name: String,
    /// Whether a user asked for the snapshot (as opposed to the system).
    pub user_created: bool,
    /// Creation timestamp supplied by the caller.
    pub created: String,
}

/// Progress of a clone into this replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloneStatus {
    /// The replica is not a clone target.
    #[default]
    NotApplicable,
    /// A clone is being copied in.
    InProgress,
    /// The clone finished.
    Completed,
    /// The clone failed.
    Failed,
}

impl fmt::Display for CloneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloneStatus::NotApplicable => "NA",
            CloneStatus::InProgress => "inProgress",
            CloneStatus::Completed => "completed",
            CloneStatus::Failed => "error",
        };
        f.write_str(name)
    }
}

/// Replica consistency state as stored on the medium.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaMeta {
    /// Logical volume size in bytes.
    pub size: u64,
    /// Sector size in bytes.
    pub sector_size: u64,
    /// Write-ordering counter.
    pub revision_counter: u64,
    /// Operating mode.
    pub mode: ReplicaMode,
    /// Snapshot chain, oldest first.
    pub chain: Vec<SnapshotInfo>,
    /// Last snapshot confirmed durable across the group.
    pub checkpoint: Option<String>,
    /// Clone progress.
    pub clone_status: CloneStatus,
    /// Volume the replica belongs to, once known.
    pub volume_name: Option<String>,
}

impl ReplicaMeta {
    /// Creates metadata for a fresh replica.
    #[must_use]
    pub fn new(size: u64, sector_size: u64, volume_name: Option<String>) -> Self {
        Self {
            size,
            sector_size,
            revision_counter: 0,
            mode: ReplicaMode::Normal,
            chain: Vec::new(),
            checkpoint: None,
            clone_status: CloneStatus::NotApplicable,
            volume_name,
        }
    }

    /// Returns true if `name` is in the chain.
    #[must_use]
    pub fn contains_snapshot(&self, name: &str) -> bool {
        self.chain.iter().any(|s| s.name == name)
    }

    /// Looks up a chain entry by name.
    #[must_use]
    pub fn snapshot(&self, name: &str) -> Option<&SnapshotInfo> {
        self.chain.iter().find(|s| s.name == name)
    }

    /// Returns the chain as names, oldest first.
    #[must_use]
    pub fn chain_names(&self) -> Vec<String> {
        self.chain.iter().map(|s| s.name.clone()).collect()
    }

    /// Checks internal consistency of a decoded record.
    pub fn validate(&self) -> BackendResult<()> {
        if !self.sector_size.is_power_of_two() {
            return Err(BackendError::invalid_format(format!(
                "sector size {} is not a power of two",
                self.sector_size
            )));
        }
        if self.size % self.sector_size != 0 {
            return Err(BackendError::invalid_format(format!(
                "size {} is not a multiple of sector size {}",
                self.size, self.sector_size
            )));
        }

        let mut seen = HashSet::new();
        for snapshot in &self.chain {
            if !seen.insert(snapshot.name.as_str()) {
                return Err(BackendError::invalid_format(format!(
                    "snapshot {} appears twice in the chain",
                    snapshot.name
                )));
            }
        }

        if let Some(checkpoint) = &self.checkpoint {
            if !seen.contains(checkpoint.as_str()) {
                return Err(BackendError::invalid_format(format!(
                    "checkpoint {checkpoint} is not in the chain"
                )));
            }
        }
        Ok(())
    }

    /// Encodes the record.
    pub fn encode(&self) -> BackendResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&META_MAGIC);
        buf.extend_from_slice(&META_VERSION.to_le_bytes());
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| BackendError::invalid_format(format!("encode failed: {e}")))?;
        Ok(buf)
    }

    /// Decodes and validates a record.
    pub fn decode(data: &[u8]) -> BackendResult<Self> {
        if data.len() < HEADER_LEN || data[0..4] != META_MAGIC {
            return Err(BackendError::invalid_format("invalid metadata magic"));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > META_VERSION {
            return Err(BackendError::invalid_format(format!(
                "unsupported metadata version: {version}"
            )));
        }

        let meta: Self = ciborium::from_reader(&data[HEADER_LEN..])
            .map_err(|e| BackendError::invalid_format(format!("decode failed: {e}")))?;
        meta.validate()?;
        Ok(meta)
    }
}
