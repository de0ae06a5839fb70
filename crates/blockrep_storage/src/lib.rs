//! # blockrep storage
//!
//! Storage media for blockrep replicas.
//!
//! This crate provides the lowest-level storage abstraction: the byte-range
//! capability set a replica needs from its physical storage. Media are
//! **opaque byte stores** - they do not interpret the data or the metadata
//! record they hold.
//!
//! ## Design Principles
//!
//! - Media are simple byte stores (read, write, stat, flush, deallocate)
//! - No knowledge of revision counters, snapshot chains or replica modes
//! - Must be `Send + Sync` for concurrent access
//! - One owner at a time; binding a held medium fails with `Locked`
//!
//! ## Available Media
//!
//! - [`FileMedium`] - Directory on a local file system
//! - [`MemoryMedium`] - For testing and ephemeral volumes
//! - `FaultyMedium` - Wrapper that injects failures (`testing` feature)
//!
//! ## Example
//!
//! ```rust
//! use blockrep_storage::{Medium, MemoryMedium};
//!
//! let medium = MemoryMedium::new();
//! medium.set_size(4096).unwrap();
//! medium.write_at(512, b"hello world").unwrap();
//! assert_eq!(&medium.read_at(512, 11).unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
#[cfg(any(test, feature = "testing"))]
mod faulty;
mod file;
mod medium;
mod memory;

pub use error::{StorageError, StorageResult};
#[cfg(any(test, feature = "testing"))]
pub use faulty::{Faults, FaultyMedium};
pub use file::FileMedium;
pub use medium::Medium;
pub use memory::{MemoryMedium, MemoryVolume};
