//! ms_store
//!
//! File-resident state shared between independently scheduled msflow
//! processes: named locks, durable FIFO queues and the imported-sample ledger.

// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms
)]
#![warn(unused)]

mod file;
pub mod ledger;
pub mod locks;
pub mod queue;

pub use ledger::ImportedSet;
pub use locks::{FileLocks, LockGuard, MemoryLocks, NamedLocks};
pub use queue::DurableQueue;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not atomically replace {path:?}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not take lock '{name}'")]
    Lock {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Attach the offending path to an io::Error.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T, StoreError>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::Io {
            path: path.into(),
            source,
        })
    }
}
