//! Inspect command implementation.

use super::{open_replica, CommandResult};
use blockrep_backend::{Backend, VolUsage};
use serde::Serialize;
use std::path::Path;

/// Replica inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Replica directory.
    pub path: String,
    /// Volume the replica belongs to, if recorded.
    pub volume: Option<String>,
    /// Replica mode.
    pub mode: String,
    /// Revision counter.
    pub revision_counter: u64,
    /// Checkpoint snapshot, if set.
    pub checkpoint: Option<String>,
    /// Clone progress.
    pub clone_status: String,
    /// Snapshot chain, oldest first.
    pub snapshots: Vec<SnapshotRow>,
    /// Snapshots the chain still accepts.
    pub remain_snapshots: usize,
    /// Space accounting.
    pub usage: VolUsage,
}

/// One snapshot chain entry.
#[derive(Debug, Serialize)]
pub struct SnapshotRow {
    /// Snapshot name.
    pub name: String,
    /// Whether a user created it.
    pub user_created: bool,
    /// Creation timestamp.
    pub created: String,
}

/// Collects the inspection result for the replica at `path`.
pub fn collect(path: &Path) -> CommandResult<InspectResult> {
    let replica = open_replica(path)?;
    let meta = replica.metadata();

    let result = InspectResult {
        path: path.display().to_string(),
        volume: meta.volume_name.clone(),
        mode: meta.mode.to_string(),
        revision_counter: meta.revision_counter,
        checkpoint: meta.checkpoint.clone(),
        clone_status: meta.clone_status.to_string(),
        snapshots: meta
            .chain
            .iter()
            .map(|s| SnapshotRow {
                name: s.name.clone(),
                user_created: s.user_created,
                created: s.created.clone(),
            })
            .collect(),
        remain_snapshots: replica.remain_snapshots()?,
        usage: replica.vol_usage()?,
    };
    replica.close()?;
    Ok(result)
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult {
    let result = collect(path)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("blockrep Replica Inspection");
    println!("===========================");
    println!();
    println!("Path:   {}", result.path);
    if let Some(volume) = &result.volume {
        println!("Volume: {}", volume);
    }
    println!();
    println!("State:");
    println!("  Mode:             {}", result.mode);
    println!("  Revision counter: {}", result.revision_counter);
    println!(
        "  Checkpoint:       {}",
        result.checkpoint.as_deref().unwrap_or("-")
    );
    println!("  Clone status:     {}", result.clone_status);
    println!();
    println!("Storage:");
    println!("  Size:        {}", format_size(result.usage.total_bytes));
    println!("  Used:        {}", format_size(result.usage.used_bytes));
    println!("  Sector size: {} bytes", result.usage.sector_size);
    println!("  Used blocks: {}", result.usage.used_blocks);
    println!();
    println!(
        "Snapshots ({} used, {} remaining):",
        result.snapshots.len(),
        result.remain_snapshots
    );
    for snapshot in &result.snapshots {
        let marker = if result.checkpoint.as_deref() == Some(snapshot.name.as_str()) {
            " [checkpoint]"
        } else {
            ""
        };
        let origin = if snapshot.user_created { "user" } else { "system" };
        println!(
            "  {} ({}, {}){}",
            snapshot.name, origin, snapshot.created, marker
        );
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
