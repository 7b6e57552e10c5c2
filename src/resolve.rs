//! Turning a module's revision reference into a concrete revision.

use thiserror::Error;

use crate::exec::ShellCapture;
use crate::scm::{Scm, ScmError};
use crate::types::{ModulePath, Revision};

/// A reference that could not be resolved.
#[derive(Error, Debug)]
#[error("cannot resolve {reference:?} for {module}: {source}")]
pub struct ResolutionError {
    pub module: ModulePath,
    pub reference: String,
    #[source]
    pub source: ScmError,
}

/// Resolves references with inspection commands run on this machine.
///
/// Resolution is never cached: a branch may have moved since the last deploy.
pub struct Resolver<'a> {
    shell: &'a dyn ShellCapture,
}

impl<'a> Resolver<'a> {
    pub fn new(shell: &'a dyn ShellCapture) -> Self {
        Self { shell }
    }

    pub fn resolve(
        &self,
        module: &ModulePath,
        reference: &str,
        scm: &dyn Scm,
    ) -> Result<Revision, ResolutionError> {
        let revision =
            scm.query_revision(reference, self.shell)
                .map_err(|source| ResolutionError {
                    module: module.clone(),
                    reference: reference.to_string(),
                    source,
                })?;
        log::debug!("{}: {} resolved to {}", module, reference, revision);
        Ok(revision)
    }
}
