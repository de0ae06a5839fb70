//! A controller-side registry of attached backends.

use crate::backend::Backend;
use crate::error::{BackendError, BackendResult};
use crate::factory::BackendFactory;
use crate::monitor::{MonitorEvent, MonitorReceiver};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

struct Attached {
    backend: Arc<dyn Backend>,
    op_lock: Mutex<()>,
    monitor: Mutex<Option<MonitorReceiver>>,
}

/// The replicas of one volume, keyed by address.
///
/// The set owns each backend from attach to detach, holds its monitor
/// receiver, and serialises ordering-sensitive operation sequences per
/// replica through [`ReplicaSet::exclusive`].
pub struct ReplicaSet {
    factory: Arc<dyn BackendFactory>,
    replicas: RwLock<BTreeMap<String, Arc<Attached>>>,
}

impl ReplicaSet {
    /// Creates an empty set drawing backends from `factory`.
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            replicas: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a backend for `address` and adds it to the set.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the address is attached already, or any
    /// error from the factory.
    pub fn attach(&self, address: &str) -> BackendResult<Arc<dyn Backend>> {
        self.attach_with(address, false)
    }

    /// Like [`attach`](Self::attach), with the new backend in `Rebuilding`.
    pub fn attach_for_rebuild(&self, address: &str) -> BackendResult<Arc<dyn Backend>> {
        self.attach_with(address, true)
    }

    fn attach_with(&self, address: &str, rebuild: bool) -> BackendResult<Arc<dyn Backend>> {
        if self.replicas.read().contains_key(address) {
            return Err(BackendError::AlreadyExists {
                address: address.to_string(),
            });
        }

        let backend = if rebuild {
            self.factory.create_for_rebuild(address)?
        } else {
            self.factory.create(address)?
        };
        let monitor = backend.monitor_channel().ok();

        let mut replicas = self.replicas.write();
        if replicas.contains_key(address) {
            drop(replicas);
            if let Err(e) = backend.close() {
                warn!(address, error = %e, "could not close backend after losing attach race");
            }
            return Err(BackendError::AlreadyExists {
                address: address.to_string(),
            });
        }
        replicas.insert(
            address.to_string(),
            Arc::new(Attached {
                backend: Arc::clone(&backend),
                op_lock: Mutex::new(()),
                monitor: Mutex::new(monitor),
            }),
        );
        info!(address, rebuild, replicas = replicas.len(), "attached replica");
        Ok(backend)
    }

    /// Removes `address` from the set and closes its backend.
    ///
    /// Waits for a running [`exclusive`](Self::exclusive) sequence on the
    /// replica to finish first.
    ///
    /// # Errors
    ///
    /// Returns `UnknownReplica` if the address is not attached.
    pub fn detach(&self, address: &str) -> BackendResult<()> {
        let attached = self
            .replicas
            .write()
            .remove(address)
            .ok_or_else(|| BackendError::UnknownReplica {
                address: address.to_string(),
            })?;

        let _guard = attached.op_lock.lock();
        attached.backend.close()?;
        info!(address, "detached replica");
        Ok(())
    }

    /// Returns the backend attached at `address`.
    pub fn get(&self, address: &str) -> Option<Arc<dyn Backend>> {
        self.replicas
            .read()
            .get(address)
            .map(|attached| Arc::clone(&attached.backend))
    }

    /// Returns the attached addresses in order.
    pub fn addresses(&self) -> Vec<String> {
        self.replicas.read().keys().cloned().collect()
    }

    /// Returns the number of attached replicas.
    pub fn len(&self) -> usize {
        self.replicas.read().len()
    }

    /// Returns true if no replica is attached.
    pub fn is_empty(&self) -> bool {
        self.replicas.read().is_empty()
    }

    /// Runs `f` on the backend at `address` while no other exclusive
    /// sequence runs on it.
    ///
    /// Use this for sequences whose order matters, such as writing and then
    /// advancing the revision counter.
    pub fn exclusive<R>(
        &self,
        address: &str,
        f: impl FnOnce(&dyn Backend) -> BackendResult<R>,
    ) -> BackendResult<R> {
        let attached = self.attached(address)?;
        let _guard = attached.op_lock.lock();
        f(attached.backend.as_ref())
    }

    /// Collects every buffered monitor event, tagged with its address.
    pub fn drain_events(&self) -> Vec<(String, MonitorEvent)> {
        let replicas: Vec<_> = self
            .replicas
            .read()
            .iter()
            .map(|(address, attached)| (address.clone(), Arc::clone(attached)))
            .collect();

        let mut events = Vec::new();
        for (address, attached) in replicas {
            if let Some(rx) = attached.monitor.lock().as_ref() {
                events.extend(rx.try_iter().map(|event| (address.clone(), event)));
            }
        }
        events
    }

    /// Pings every replica and returns the ones that failed.
    pub fn check_health(&self) -> Vec<(String, BackendError)> {
        let replicas: Vec<_> = self
            .replicas
            .read()
            .iter()
            .map(|(address, attached)| (address.clone(), Arc::clone(&attached.backend)))
            .collect();

        replicas
            .into_iter()
            .filter_map(|(address, backend)| match backend.ping_response() {
                Ok(()) => None,
                Err(e) => {
                    warn!(address = %address, error = %e, "replica failed health check");
                    Some((address, e))
                }
            })
            .collect()
    }

    /// Detaches and closes every replica.
    ///
    /// # Errors
    ///
    /// Returns the first close error; every replica is closed regardless.
    pub fn shutdown(&self) -> BackendResult<()> {
        let replicas = std::mem::take(&mut *self.replicas.write());
        let mut first_error = None;
        for (address, attached) in replicas {
            let _guard = attached.op_lock.lock();
            match attached.backend.close() {
                Ok(()) | Err(BackendError::AlreadyClosed) => {}
                Err(e) => {
                    warn!(address = %address, error = %e, "failed to close replica");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn attached(&self, address: &str) -> BackendResult<Arc<Attached>> {
        self.replicas
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| BackendError::UnknownReplica {
                address: address.to_string(),
            })
    }
}

impl fmt::Debug for ReplicaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaSet")
            .field("addresses", &self.addresses())
            .finish_non_exhaustive()
    }
}

impl Drop for ReplicaSet {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "replica set shutdown failed");
        }
    }
}
