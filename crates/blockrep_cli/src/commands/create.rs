//! Create command implementation.

use super::CommandResult;
use blockrep_backend::{Backend, BackendConfig, BackendFactory, FileBackendFactory};
use std::path::Path;
use tracing::info;

/// Runs the create command.
pub fn run(path: &Path, size: u64, sector_size: u64, volume: Option<String>) -> CommandResult {
    if path.join("META").exists() {
        return Err(format!("Replica already exists at {:?}", path).into());
    }

    let mut config = BackendConfig::new().volume_size(size).sector_size(sector_size);
    if let Some(volume) = volume {
        config = config.volume_name(volume);
    }

    let factory = FileBackendFactory::new(config);
    let backend = factory.create(&path.display().to_string())?;
    info!(
        path = %path.display(),
        size = backend.size()?,
        sector_size = backend.sector_size()?,
        "created replica"
    );
    println!("Created replica at {:?}", path);
    println!("  Size:        {} bytes", backend.size()?);
    println!("  Sector size: {} bytes", backend.sector_size()?);
    backend.close()?;
    Ok(())
}
