//! Backend factories: construction by address and membership signalling.

use crate::backend::Backend;
use crate::config::BackendConfig;
use crate::error::{BackendError, BackendResult};
use crate::replica::Replica;
use blockrep_storage::{FileMedium, MemoryMedium, MemoryVolume, StorageError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a membership signal asks the controller to do with a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalAction {
    /// Add the replica to the group.
    Add,
    /// Remove the replica from the group.
    Remove,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Add => f.write_str("add"),
            SignalAction::Remove => f.write_str("remove"),
        }
    }
}

impl FromStr for SignalAction {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(SignalAction::Add),
            "remove" => Ok(SignalAction::Remove),
            other => Err(BackendError::invalid_config(format!(
                "unknown signal action: {other}"
            ))),
        }
    }
}

/// Delivers membership signals to whatever manages the replica group.
pub trait MembershipNotifier: Send + Sync {
    /// Asks for `address` to be added to or removed from the group.
    fn notify(&self, address: &str, action: SignalAction) -> BackendResult<()>;
}

/// Produces backends for replica addresses.
pub trait BackendFactory: Send + Sync {
    /// Binds a backend to `address`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a live backend holds the address.
    fn create(&self, address: &str) -> BackendResult<Arc<dyn Backend>>;

    /// Binds a backend to `address` and puts it in `Rebuilding` mode, for
    /// a replica joining a group it has to catch up with.
    fn create_for_rebuild(&self, address: &str) -> BackendResult<Arc<dyn Backend>> {
        let backend = self.create(address)?;
        if let Err(e) = backend.set_rebuilding(true) {
            if let Err(close) = backend.close() {
                warn!(address, error = %close, "could not close backend after failed rebuild join");
            }
            return Err(e);
        }
        Ok(backend)
    }

    /// Requests that `address` be added to or removed from the group.
    fn signal_to_add(&self, address: &str, action: SignalAction) -> BackendResult<()>;
}

/// Optional notifier shared by the factories.
#[derive(Clone, Default)]
struct Signaller {
    notifier: Option<Arc<dyn MembershipNotifier>>,
}

impl Signaller {
    fn signal(&self, address: &str, action: SignalAction) -> BackendResult<()> {
        match &self.notifier {
            Some(notifier) => {
                info!(address, action = %action, "signalling membership change");
                notifier.notify(address, action)
            }
            None => {
                debug!(address, action = %action, "no membership notifier configured");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Signaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signaller")
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

fn bind_error(address: &str, e: StorageError) -> BackendError {
    match e {
        StorageError::Locked(_) => BackendError::AlreadyExists {
            address: address.to_string(),
        },
        e => BackendError::Storage(e),
    }
}

/// Creates file-backed replicas, one directory per address.
#[derive(Debug, Clone, Default)]
pub struct FileBackendFactory {
    config: BackendConfig,
    signaller: Signaller,
}

impl FileBackendFactory {
    /// Creates a factory using `config` for new replicas.
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            signaller: Signaller::default(),
        }
    }

    /// Routes membership signals to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn MembershipNotifier>) -> Self {
        self.signaller.notifier = Some(notifier);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }
}

impl BackendFactory for FileBackendFactory {
    fn create(&self, address: &str) -> BackendResult<Arc<dyn Backend>> {
        self.config.validate()?;
        let medium = FileMedium::open(Path::new(address)).map_err(|e| bind_error(address, e))?;
        let replica = Replica::open(address, medium, &self.config)?;
        Ok(Arc::new(replica))
    }

    fn signal_to_add(&self, address: &str, action: SignalAction) -> BackendResult<()> {
        self.signaller.signal(address, action)
    }
}

/// Creates in-memory replicas.
///
/// Volumes are kept per address for the life of the factory, so a replica
/// closed and created again sees its previous state.
#[derive(Debug, Default)]
pub struct MemoryBackendFactory {
    config: BackendConfig,
    volumes: Mutex<HashMap<String, Arc<MemoryVolume>>>,
    signaller: Signaller,
}

impl MemoryBackendFactory {
    /// Creates a factory using `config` for new replicas.
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            volumes: Mutex::new(HashMap::new()),
            signaller: Signaller::default(),
        }
    }

    /// Routes membership signals to `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn MembershipNotifier>) -> Self {
        self.signaller.notifier = Some(notifier);
        self
    }

    /// Returns the volume stored for `address`, if one was created.
    pub fn volume(&self, address: &str) -> Option<Arc<MemoryVolume>> {
        self.volumes.lock().get(address).cloned()
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn create(&self, address: &str) -> BackendResult<Arc<dyn Backend>> {
        self.config.validate()?;
        let volume = Arc::clone(
            self.volumes
                .lock()
                .entry(address.to_string())
                .or_insert_with(MemoryVolume::new),
        );
        let medium = MemoryMedium::bind(volume, address).map_err(|e| bind_error(address, e))?;
        let replica = Replica::open(address, medium, &self.config)?;
        Ok(Arc::new(replica))
    }

    fn signal_to_add(&self, address: &str, action: SignalAction) -> BackendResult<()> {
        self.signaller.signal(address, action)
    }
}
