//! Snapshot command implementation.

use super::{open_replica, CommandResult};
use blockrep_backend::Backend;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Runs the snapshot command.
pub fn run(path: &Path, name: &str, user_created: bool, created: Option<String>) -> CommandResult {
    let created = created.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
            .to_string()
    });

    let replica = open_replica(path)?;
    replica.snapshot(name, user_created, &created)?;
    info!(path = %path.display(), snapshot = name, user_created, created = %created, "snapshot taken");
    println!(
        "Created snapshot {} ({} remaining)",
        name,
        replica.remain_snapshots()?
    );
    replica.close()?;
    Ok(())
}
