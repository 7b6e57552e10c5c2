//! Revision-addressed checkout cache.
//!
//! Every `(module, revision)` pair gets one directory under the shared root.
//! Slots are filled once and then reused by every later deploy.

mod lock;
mod paths;
mod slot;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::types::{ModulePath, Revision};

pub use lock::SlotLock;
pub use paths::SlotPaths;
pub use slot::{CheckoutCache, SlotRef};

/// Counter behind staging and temp-link names within a process
static SUFFIX_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors from populating a cache slot.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The checkout did not complete. Nothing was left in the cache.
    #[error("checkout of {module} at {revision} failed: {reason}")]
    CheckoutFailed {
        module: ModulePath,
        revision: Revision,
        reason: String,
    },
    /// A failed checkout could not be cleaned up.
    #[error("failed to remove {path} after a failed checkout of {module}: {source}")]
    CleanupFailed {
        module: ModulePath,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to lock the cache slot for {module}: {source}")]
    LockFailed {
        module: ModulePath,
        #[source]
        source: io::Error,
    },
    #[error("cache I/O error for {module}: {source}")]
    Io {
        module: ModulePath,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    /// The module the error is about.
    pub fn module(&self) -> &ModulePath {
        match self {
            Self::CheckoutFailed { module, .. }
            | Self::CleanupFailed { module, .. }
            | Self::LockFailed { module, .. }
            | Self::Io { module, .. } => module,
        }
    }
}

/// `{pid}.{counter}`: unique among concurrent processes on one host.
pub(crate) fn unique_suffix() -> String {
    let counter = SUFFIX_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}.{}", std::process::id(), counter)
}

/// Remove a file, symlink or directory tree. A missing path is not an error.
///
/// Symlinks are removed themselves, never followed.
pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
