use std::io;
use std::path::{Path, PathBuf};

use super::PublishError;
use super::swap::{atomic_symlink_swap, read_symlink_target};
use crate::cache::remove_path;
use crate::types::ModulePath;

/// Links modules into a project tree on this machine.
#[derive(Debug, Clone)]
pub struct LocalPublisher {
    project_root: PathBuf,
}

impl LocalPublisher {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    /// Where `module` is linked.
    pub fn destination(&self, module: &ModulePath) -> PathBuf {
        self.project_root.join(module.as_path())
    }

    /// Make the module's destination a symlink to `slot`.
    ///
    /// A real directory or file at the destination is removed first; an
    /// existing link is replaced atomically. Returns the destination.
    pub fn publish(&self, module: &ModulePath, slot: &Path) -> Result<PathBuf, PublishError> {
        let destination = self.destination(module);
        let failed = |source: io::Error| PublishError::Local {
            module: module.clone(),
            destination: destination.clone(),
            source,
        };

        self.check_parents(module).map_err(failed)?;

        if read_symlink_target(&destination).map_err(failed)?.as_deref() == Some(slot) {
            log::debug!("{} already points at {}", module, slot.display());
            return Ok(destination);
        }

        let is_link = std::fs::symlink_metadata(&destination)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_link {
            remove_path(&destination).map_err(failed)?;
        }

        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(failed)?;
        }
        atomic_symlink_swap(&destination, slot).map_err(failed)?;

        log::debug!("linked {} -> {}", destination.display(), slot.display());
        Ok(destination)
    }

    /// Fails if a directory between the project root and the destination is
    /// a symlink. Writing through it would modify the slot it points into.
    fn check_parents(&self, module: &ModulePath) -> io::Result<()> {
        let parents = module
            .as_path()
            .ancestors()
            .skip(1)
            .take_while(|parent| !parent.as_os_str().is_empty());
        for parent in parents {
            let path = self.project_root.join(parent);
            let is_link = std::fs::symlink_metadata(&path)
                .is_ok_and(|meta| meta.file_type().is_symlink());
            if is_link {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is a symlink", path.display()),
                ));
            }
        }
        Ok(())
    }
}
