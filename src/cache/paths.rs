//! Checkout cache path management
//!
//! This module provides the `SlotPaths` struct which manages all filesystem
//! paths for the shared checkout cache:
//!
//! ```text
//! <shared_root>/
//! ├── externals/
//! │   └── <module_path>/
//! │       ├── <revision>/                  # Immutable checkout (slot)
//! │       └── <revision>.partial.<id>/     # In-flight checkout, renamed into place
//! └── locks/
//!     └── externals/
//!         └── <module__path>__<revision>.lock  # flock-based locking
//! ```

use std::path::{Path, PathBuf};

use crate::types::{ModulePath, Revision};

/// Manages all filesystem paths for the checkout cache layout.
///
/// Pure path arithmetic: works for local roots and for paths on a remote host.
#[derive(Debug, Clone)]
pub struct SlotPaths {
    root: PathBuf,
}

impl SlotPaths {
    /// Cache layout rooted at the given shared directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the shared root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the externals directory path: `{root}/externals`
    pub fn externals_dir(&self) -> PathBuf {
        self.root.join("externals")
    }

    /// Returns the locks directory path: `{root}/locks/externals`
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks").join("externals")
    }

    /// Returns the directory holding every slot of a module: `{root}/externals/{module}`
    pub fn module_dir(&self, module: &ModulePath) -> PathBuf {
        self.externals_dir().join(module.as_path())
    }

    /// Returns the slot directory: `{root}/externals/{module}/{revision}`
    pub fn slot_dir(&self, module: &ModulePath, revision: &Revision) -> PathBuf {
        self.module_dir(module).join(revision.as_str())
    }

    /// Returns a staging directory next to the slot: `{slot}.partial.{id}`
    pub fn staging_dir(&self, module: &ModulePath, revision: &Revision, id: &str) -> PathBuf {
        self.module_dir(module)
            .join(format!("{}.partial.{}", revision.as_str(), id))
    }

    /// Returns the lock file path: `{root}/locks/externals/{module with / as __}__{revision}.lock`
    pub fn lock_path(&self, module: &ModulePath, revision: &Revision) -> PathBuf {
        self.locks_dir().join(format!(
            "{}__{}.lock",
            module.as_str().replace('/', "__"),
            revision.as_str()
        ))
    }
}
