//! Checkpoint command implementation.

use super::{open_replica, CommandResult};
use blockrep_backend::Backend;
use std::path::Path;
use tracing::info;

/// Runs the checkpoint command.
pub fn run(path: &Path, name: &str) -> CommandResult {
    let replica = open_replica(path)?;
    replica.set_checkpoint(name)?;
    info!(path = %path.display(), snapshot = name, "checkpoint moved");
    println!("Checkpoint set to {}", name);
    replica.close()?;
    Ok(())
}
