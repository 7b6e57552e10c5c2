use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::lock::SlotLock;
use super::paths::SlotPaths;
use super::{CacheError, remove_path, unique_suffix};
use crate::types::{ModulePath, Revision};

/// Default time to wait for another process checking out the same slot.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A populated cache slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRef {
    /// Slot directory.
    pub path: PathBuf,
    pub revision: Revision,
    /// Whether this call performed the checkout.
    pub fresh: bool,
}

/// Revision-addressed checkout cache on the local filesystem.
///
/// A slot directory only ever appears through a rename of a finished staging
/// directory, so an existing slot is complete and is never modified again.
#[derive(Debug, Clone)]
pub struct CheckoutCache {
    paths: SlotPaths,
    lock_timeout: Duration,
}

impl CheckoutCache {
    pub fn new(paths: SlotPaths) -> Self {
        Self {
            paths,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set how long to wait for a concurrent checkout of the same slot.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn paths(&self) -> &SlotPaths {
        &self.paths
    }

    /// Make sure the slot for `(module, revision)` is populated.
    ///
    /// `checkout` is called at most once, with a staging directory that does
    /// not exist yet and that it must create. On success the staging directory
    /// is renamed into the slot. On failure everything it left behind is
    /// removed before the error is returned.
    pub fn ensure<F, E>(
        &self,
        module: &ModulePath,
        revision: &Revision,
        checkout: F,
    ) -> Result<SlotRef, CacheError>
    where
        F: FnOnce(&Path) -> Result<(), E>,
        E: fmt::Display,
    {
        let slot = self.paths.slot_dir(module, revision);
        if slot.is_dir() {
            log::debug!("cache hit for {} at {}", module, revision);
            return Ok(self.slot_ref(slot, revision, false));
        }

        let _lock = SlotLock::acquire(
            &self.paths.lock_path(module, revision),
            self.lock_timeout,
        )
        .map_err(|source| CacheError::LockFailed {
            module: module.clone(),
            source,
        })?;

        // Another process may have finished the checkout while we waited.
        if slot.is_dir() {
            log::debug!("cache hit for {} at {} after waiting", module, revision);
            return Ok(self.slot_ref(slot, revision, false));
        }

        let io_error = |source: io::Error| CacheError::Io {
            module: module.clone(),
            source,
        };

        std::fs::create_dir_all(self.paths.module_dir(module)).map_err(io_error)?;
        let staging = self
            .paths
            .staging_dir(module, revision, &unique_suffix());
        remove_path(&staging).map_err(io_error)?;

        log::info!("checking out {} at {}", module, revision);
        let failure = match checkout(&staging) {
            Ok(()) if staging.is_dir() => None,
            Ok(()) => Some(format!(
                "checkout did not create {}",
                staging.display()
            )),
            Err(e) => Some(e.to_string()),
        };

        if let Some(reason) = failure {
            self.discard(module, &[staging.as_path(), slot.as_path()])?;
            return Err(CacheError::CheckoutFailed {
                module: module.clone(),
                revision: revision.clone(),
                reason,
            });
        }

        if let Err(source) = std::fs::rename(&staging, &slot) {
            self.discard(module, &[staging.as_path()])?;
            return Err(io_error(source));
        }

        Ok(self.slot_ref(slot, revision, true))
    }

    fn slot_ref(&self, path: PathBuf, revision: &Revision, fresh: bool) -> SlotRef {
        SlotRef {
            path,
            revision: revision.clone(),
            fresh,
        }
    }

    /// Remove `paths` and confirm they are gone.
    fn discard(&self, module: &ModulePath, paths: &[&Path]) -> Result<(), CacheError> {
        for path in paths {
            let cleanup_failed = |source: io::Error| CacheError::CleanupFailed {
                module: module.clone(),
                path: path.to_path_buf(),
                source,
            };

            remove_path(path).map_err(cleanup_failed)?;
            if std::fs::symlink_metadata(path).is_ok() {
                return Err(cleanup_failed(io::Error::other("path still exists")));
            }
        }
        Ok(())
    }
}
