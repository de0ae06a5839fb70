//! Verify command implementation.

use super::{open_replica, CommandResult};
use blockrep_backend::{Backend, ReplicaMode};
use blockrep_storage::Medium;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of checks run.
    pub checks: usize,
    /// Problems found.
    pub errors: Vec<String>,
    /// Findings that do not fail verification.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks the replica at `path` without modifying it.
pub fn check(path: &Path) -> CommandResult<VerifyResult> {
    let mut result = VerifyResult::default();

    // Opening decodes and validates the metadata record.
    let replica = match open_replica(path) {
        Ok(replica) => replica,
        Err(e) => {
            result.checks += 1;
            result.errors.push(format!("metadata: {}", e));
            return Ok(result);
        }
    };
    let meta = replica.metadata();

    for snapshot in &meta.chain {
        result.checks += 1;
        if !replica.medium().has_capture(&snapshot.name)? {
            result
                .errors
                .push(format!("snapshot {} has no capture", snapshot.name));
        }
    }

    result.checks += 1;
    if meta.mode == ReplicaMode::Error {
        result
            .warnings
            .push("replica is in Error mode and needs recovery".to_string());
    } else if let Err(e) = replica.ping_response() {
        result.errors.push(format!("liveness: {}", e));
    }

    if meta.mode == ReplicaMode::Rebuilding {
        result
            .warnings
            .push("replica is rebuilding, data may be stale".to_string());
    }

    replica.close()?;
    Ok(result)
}

/// Runs the verify command.
pub fn run(path: &Path) -> CommandResult {
    println!("Verifying replica at {:?}", path);
    println!();

    let result = check(path)?;
    println!("  Checks run: {}", result.checks);
    for warning in &result.warnings {
        println!("  Warning: {}", warning);
    }
    for error in &result.errors {
        println!("  Error: {}", error);
    }

    println!();
    if result.is_ok() {
        println!("✓ Replica verification passed");
        Ok(())
    } else {
        println!("✗ Replica verification failed");
        Err("Verification failed".into())
    }
}
