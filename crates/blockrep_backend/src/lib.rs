//! # blockrep backend
//!
//! The replica storage-backend contract and its implementations.
//!
//! A replicated block volume keeps several replicas of its data. A
//! controller coordinates them and needs each one to expose, beyond
//! byte-range I/O, the state it uses to keep them consistent:
//!
//! - a revision counter that orders writes across replicas
//! - an append-only snapshot chain and a checkpoint into it
//! - a replica mode (`Normal`, `Rebuilding`, `Error`)
//! - a monitor channel for self-reported failures
//!
//! [`Backend`] is that contract. [`Replica`] implements it over any
//! [`Medium`](blockrep_storage::Medium), and [`BackendFactory`] binds
//! backends to addresses.
//!
//! ## Example
//!
//! ```rust
//! use blockrep_backend::{Backend, BackendConfig, BackendFactory, MemoryBackendFactory};
//!
//! let factory = MemoryBackendFactory::new(BackendConfig::new().volume_size(1 << 20));
//! let replica = factory.create("mem://vol1").unwrap();
//!
//! replica.write_at(0, &[0xAB; 4096]).unwrap();
//! replica.set_revision_counter(1).unwrap();
//! replica.snapshot("snap1", true, "2024-01-01T00:00:00Z").unwrap();
//! replica.set_checkpoint("snap1").unwrap();
//!
//! assert_eq!(replica.replica_chain().unwrap(), vec!["snap1"]);
//! replica.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod config;
mod error;
mod factory;
mod meta;
mod mode;
pub mod monitor;
mod replica;
mod replica_set;

pub use backend::{Backend, VolUsage};
pub use config::{BackendConfig, MIN_SECTOR_SIZE};
pub use error::{BackendError, BackendResult};
pub use factory::{
    BackendFactory, FileBackendFactory, MemoryBackendFactory, MembershipNotifier, SignalAction,
};
pub use meta::{CloneStatus, ReplicaMeta, SnapshotInfo, META_MAGIC, META_VERSION};
pub use mode::ReplicaMode;
pub use monitor::{MonitorEvent, MonitorReceiver, MonitorSender};
pub use replica::{FileBackend, MemoryBackend, Replica};
pub use replica_set::ReplicaSet;
