//! CLI command implementations.

pub mod checkpoint;
pub mod create;
pub mod inspect;
pub mod snapshot;
pub mod verify;

use blockrep_backend::{BackendConfig, FileBackend, Replica};
use blockrep_storage::{FileMedium, StorageError};
use std::error::Error;
use std::path::Path;

/// Result type shared by the commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn Error>>;

/// Opens an existing replica directory.
///
/// Fails instead of initialising a fresh replica when `path` holds none.
pub fn open_replica(path: &Path) -> CommandResult<FileBackend> {
    if !path.join("META").exists() {
        return Err(format!("No replica found at {:?}", path).into());
    }

    let medium = FileMedium::open(path).map_err(|e| -> Box<dyn Error> {
        match e {
            StorageError::Locked(_) => format!("Replica at {:?} is in use", path).into(),
            e => e.into(),
        }
    })?;
    let replica = Replica::open(path.display().to_string(), medium, &BackendConfig::default())?;
    Ok(replica)
}

/// Runs `f` with a subscriber that records formatted log lines.
#[cfg(test)]
pub(crate) fn capture_logs(f: impl FnOnce()) -> String {
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
