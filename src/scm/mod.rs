//! Version-control backends.
//!
//! Each backend resolves a symbolic reference to a concrete [`Revision`] and
//! describes how to check that revision out into a directory. Backends are
//! chosen through [`ScmRegistry`], keyed by the module's `:type`.

mod git;
mod subversion;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ModuleSpec;
use crate::exec::{ExecError, ShellCapture, ShellCommand};
use crate::types::{BackendKind, ParseError, Revision};

pub use git::Git;
pub use subversion::Subversion;

/// Errors returned by backends.
#[derive(Error, Debug)]
pub enum ScmError {
    /// No backend is registered for the module's type.
    #[error("unknown scm type '{0}'")]
    UnknownBackend(BackendKind),
    /// A required option is missing from the module definition.
    #[error("missing required option :{0}")]
    MissingOption(&'static str),
    /// An option value is unusable.
    #[error("invalid option :{key}: {reason}")]
    InvalidOption { key: &'static str, reason: String },
    /// The reference would be unsafe to pass to the backend.
    #[error("invalid reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },
    /// The backend does not know the reference.
    #[error("reference {0:?} not found")]
    UnknownReference(String),
    /// The backend answered with something that is not a usable revision.
    #[error("backend returned an invalid revision {value:?}: {source}")]
    InvalidRevision {
        value: String,
        #[source]
        source: ParseError,
    },
    /// Output from the backend could not be understood.
    #[error("failed to parse backend output: {0}")]
    Parse(String),
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// An inspection command failed.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// A version-control backend bound to one module's options.
pub trait Scm {
    /// Resolve `reference` (branch, tag, `HEAD`, revision) to a concrete revision.
    ///
    /// Implementations may run read-only commands through `shell` and must
    /// not modify any repository or working tree.
    fn query_revision(&self, reference: &str, shell: &dyn ShellCapture)
    -> Result<Revision, ScmError>;

    /// The command that checks `revision` out into `destination`.
    ///
    /// `destination` must not exist yet; the command creates it.
    fn checkout(&self, revision: &Revision, destination: &Path) -> Result<ShellCommand, ScmError>;
}

/// Builds a backend from a module definition.
pub type ScmFactory = Box<dyn Fn(&ModuleSpec) -> Result<Box<dyn Scm>, ScmError>>;

/// Backends available to a run, keyed by type tag.
pub struct ScmRegistry {
    factories: BTreeMap<BackendKind, ScmFactory>,
    project_root: Option<PathBuf>,
}

impl Default for ScmRegistry {
    /// `git`, plus `subversion` (alias `svn`).
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_kind("git", |spec| Ok(Box::new(Git::from_spec(spec)?)));
        registry.register_kind("subversion", |spec| {
            Ok(Box::new(Subversion::from_spec(spec)?))
        });
        registry.register_kind("svn", |spec| Ok(Box::new(Subversion::from_spec(spec)?)));
        registry
    }
}

impl ScmRegistry {
    /// A registry with no backends.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
            project_root: None,
        }
    }

    /// Read relative `:repository` paths from `root` rather than from the
    /// process working directory.
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Register `factory` under `kind`, replacing any previous backend.
    pub fn register<F>(&mut self, kind: BackendKind, factory: F)
    where
        F: Fn(&ModuleSpec) -> Result<Box<dyn Scm>, ScmError> + 'static,
    {
        self.factories.insert(kind, Box::new(factory));
    }

    fn register_kind<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ModuleSpec) -> Result<Box<dyn Scm>, ScmError> + 'static,
    {
        if let Ok(kind) = kind.parse() {
            self.register(kind, factory);
        }
    }

    /// Registered type tags, sorted.
    pub fn kinds(&self) -> impl Iterator<Item = &BackendKind> {
        self.factories.keys()
    }

    /// Build the backend for `spec`.
    pub fn build(&self, spec: &ModuleSpec) -> Result<Box<dyn Scm>, ScmError> {
        let factory = self
            .factories
            .get(&spec.backend)
            .ok_or_else(|| ScmError::UnknownBackend(spec.backend.clone()))?;
        let anchored = self
            .project_root
            .as_deref()
            .and_then(|root| anchor_repository(spec, root));
        factory(anchored.as_ref().unwrap_or(spec))
    }
}

/// `spec` with a relative `:repository` that exists under `root` made
/// absolute. `None` when there is nothing to rewrite.
fn anchor_repository(spec: &ModuleSpec, root: &Path) -> Option<ModuleSpec> {
    let repository = spec.option_str("repository")?;
    if repository.contains("://") || Path::new(&repository).is_absolute() {
        return None;
    }
    let anchored = root.join(&repository);
    if !anchored.exists() {
        return None;
    }
    log::debug!("repository {} is {}", repository, anchored.display());
    Some(
        spec.clone()
            .with_option("repository", anchored.to_string_lossy().into_owned()),
    )
}

/// Validate that a reference is safe to place on a command line.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal, git range syntax)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes, control characters or whitespace
pub(crate) fn validate_reference(reference: &str) -> Result<(), ScmError> {
    let invalid = |reason: &str| ScmError::InvalidReference {
        reference: reference.to_string(),
        reason: reason.to_string(),
    };

    if reference.is_empty() {
        return Err(invalid("cannot be empty"));
    }
    if reference.contains("..") {
        return Err(invalid("cannot contain '..'"));
    }
    if reference.starts_with('-') {
        return Err(invalid("cannot start with '-'"));
    }
    if reference
        .chars()
        .any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(invalid("cannot contain whitespace or control characters"));
    }
    Ok(())
}

/// Parse backend output into a revision.
pub(crate) fn parse_revision(value: &str) -> Result<Revision, ScmError> {
    value.parse().map_err(|source| ScmError::InvalidRevision {
        value: value.to_string(),
        source,
    })
}

/// Fetch a required string option.
pub(crate) fn required_option(spec: &ModuleSpec, key: &'static str) -> Result<String, ScmError> {
    spec.option_str(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ScmError::MissingOption(key))
}

/// Convert a destination path for use in a command line.
pub(crate) fn path_arg(path: &Path) -> Result<String, ScmError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| ScmError::Parse(format!("path is not valid UTF-8: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: &str) -> ModuleSpec {
        ModuleSpec::new(kind.parse().unwrap(), "HEAD")
            .with_option("repository", "https://example.com/repo")
    }

    #[test]
    fn default_registry_knows_git_and_subversion() {
        let registry = ScmRegistry::default();
        let kinds: Vec<_> = registry.kinds().map(|k| k.as_str()).collect();
        assert_eq!(kinds, vec!["git", "subversion", "svn"]);
        assert!(registry.build(&spec("git")).is_ok());
        assert!(registry.build(&spec("svn")).is_ok());
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let registry = ScmRegistry::default();
        let err = registry.build(&spec("darcs")).err().unwrap();
        assert!(matches!(err, ScmError::UnknownBackend(ref k) if k.as_str() == "darcs"));
    }

    #[test]
    fn factory_errors_are_propagated() {
        let registry = ScmRegistry::default();
        let spec = ModuleSpec::new("git".parse().unwrap(), "HEAD");
        let err = registry.build(&spec).err().unwrap();
        assert!(matches!(err, ScmError::MissingOption("repository")));
    }

    #[test]
    fn relative_repository_is_read_from_project_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("upstream")).unwrap();
        let spec = ModuleSpec::new("git".parse().unwrap(), "HEAD")
            .with_option("repository", "upstream");

        let anchored = anchor_repository(&spec, dir.path()).unwrap();
        assert_eq!(
            anchored.option_str("repository").unwrap(),
            dir.path().join("upstream").to_string_lossy()
        );

        let url = spec.clone().with_option("repository", "https://example.com/upstream");
        assert!(anchor_repository(&url, dir.path()).is_none());
        let missing = spec.with_option("repository", "elsewhere");
        assert!(anchor_repository(&missing, dir.path()).is_none());
    }

    #[test]
    fn validate_reference_rejects_dangerous_values() {
        assert!(validate_reference("main").is_ok());
        assert!(validate_reference("refs/tags/v1.0").is_ok());
        assert!(validate_reference("").is_err());
        assert!(validate_reference("--upload-pack=evil").is_err());
        assert!(validate_reference("main..evil").is_err());
        assert!(validate_reference("main evil").is_err());
        assert!(validate_reference("main\0").is_err());
    }
}
