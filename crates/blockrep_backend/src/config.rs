//! Backend configuration.

use crate::error::{BackendError, BackendResult};
use std::time::Duration;

/// Smallest accepted sector size.
pub const MIN_SECTOR_SIZE: u64 = 512;

/// Configuration for opening replica backends.
///
/// Geometry settings only apply to fresh media; an existing replica keeps
/// the geometry recorded in its metadata.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Logical size of a freshly created volume.
    pub volume_size: u64,

    /// Sector size of a freshly created volume.
    pub sector_size: u64,

    /// Maximum number of snapshots in a chain.
    pub max_snapshots: usize,

    /// How long `ping_response` waits for the medium.
    pub ping_timeout: Duration,

    /// Number of monitor events buffered before the oldest is dropped.
    pub monitor_capacity: usize,

    /// Volume the replicas belong to, if known up front.
    pub volume_name: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            volume_size: 64 * 1024 * 1024, // 64 MB
            sector_size: 4096,
            max_snapshots: 250,
            ping_timeout: Duration::from_secs(5),
            monitor_capacity: 64,
            volume_name: None,
        }
    }
}

impl BackendConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size of freshly created volumes.
    #[must_use]
    pub const fn volume_size(mut self, size: u64) -> Self {
        self.volume_size = size;
        self
    }

    /// Sets the sector size of freshly created volumes.
    #[must_use]
    pub const fn sector_size(mut self, size: u64) -> Self {
        self.sector_size = size;
        self
    }

    /// Sets the snapshot limit.
    #[must_use]
    pub const fn max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max;
        self
    }

    /// Sets the liveness probe deadline.
    #[must_use]
    pub const fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Sets the monitor buffer capacity.
    #[must_use]
    pub const fn monitor_capacity(mut self, capacity: usize) -> Self {
        self.monitor_capacity = capacity;
        self
    }

    /// Sets the volume name.
    #[must_use]
    pub fn volume_name(mut self, name: impl Into<String>) -> Self {
        self.volume_name = Some(name.into());
        self
    }

    /// Checks the configuration for values no replica could use.
    pub fn validate(&self) -> BackendResult<()> {
        if self.sector_size < MIN_SECTOR_SIZE || !self.sector_size.is_power_of_two() {
            return Err(BackendError::invalid_config(format!(
                "sector size {} must be a power of two of at least {MIN_SECTOR_SIZE}",
                self.sector_size
            )));
        }
        if self.volume_size == 0 || self.volume_size % self.sector_size != 0 {
            return Err(BackendError::invalid_config(format!(
                "volume size {} must be a non-zero multiple of the sector size",
                self.volume_size
            )));
        }
        if self.monitor_capacity == 0 {
            return Err(BackendError::invalid_config(
                "monitor capacity must be at least 1",
            ));
        }
        if self.ping_timeout.is_zero() {
            return Err(BackendError::invalid_config("ping timeout must be non-zero"));
        }
        Ok(())
    }
}
