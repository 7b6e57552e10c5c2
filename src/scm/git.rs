//! Git backend using a hybrid CLI + libgit2 approach.
//!
//! **CLI for anything that touches the network or must also run remotely:**
//! - `query_revision` against a URL runs `git ls-remote`
//! - `checkout` is a `git clone` + `git checkout` command line
//!
//! **libgit2 for read operations on repositories already on disk:**
//! - `open_repository` - clean API for opening existing repos
//! - `resolve_local` - rev-parse without spawning git
//! - `repository_exists` - simple path validation

use std::path::{Path, PathBuf};

use git2::Repository;

use super::{ScmError, path_arg, parse_revision, required_option, validate_reference};
use super::Scm;
use crate::config::ModuleSpec;
use crate::exec::{ShellCapture, ShellCommand};
use crate::types::Revision;

/// Branch created in every checkout so the working copy is not detached.
const DEPLOY_BRANCH: &str = "deploy";

/// Git backend for one module.
///
/// Options: `:repository` (required), `:depth` (or `:git_shallow_clone`),
/// `:branch`, `:remote`, `:git_enable_submodules`.
#[derive(Debug, Clone)]
pub struct Git {
    repository: String,
    depth: Option<u32>,
    branch: Option<String>,
    remote: Option<String>,
    submodules: bool,
    git_path: String,
}

impl Git {
    /// Create a backend from a module definition.
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, ScmError> {
        let repository = required_option(spec, "repository")?;
        if repository.starts_with('-') {
            return Err(ScmError::InvalidOption {
                key: "repository",
                reason: "cannot start with '-'".to_string(),
            });
        }

        // `:git_shallow_clone` is the older name; `true` means a depth of 1.
        let depth_option = ["depth", "git_shallow_clone"]
            .into_iter()
            .find_map(|key| spec.option_str(key).map(|raw| (key, raw)));
        let depth = match depth_option {
            None => None,
            Some(("git_shallow_clone", raw)) if raw == "true" => Some(1),
            Some(("git_shallow_clone", raw)) if raw == "false" => None,
            Some((key, raw)) => match raw.trim().parse::<u32>() {
                Ok(0) | Err(_) => {
                    return Err(ScmError::InvalidOption {
                        key,
                        reason: format!("expected a positive integer, got {:?}", raw),
                    });
                }
                Ok(depth) => Some(depth),
            },
        };

        let branch = spec.option_str("branch");
        if let Some(branch) = &branch {
            validate_reference(branch)?;
        }
        let remote = spec.option_str("remote");
        if let Some(remote) = &remote {
            validate_reference(remote)?;
        }

        Ok(Self {
            repository,
            depth,
            branch,
            remote,
            submodules: spec.option_bool("git_enable_submodules"),
            git_path: "git".into(),
        })
    }

    /// A git invocation with prompts disabled.
    fn command<I, S>(&self, args: I) -> ShellCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = std::iter::once(self.git_path.clone()).chain(args.into_iter().map(Into::into));
        ShellCommand::new(argv).env("GIT_TERMINAL_PROMPT", "0")
    }

    /// The repository as a local path, when it points at an existing repo.
    fn local_repository(&self) -> Option<PathBuf> {
        let path = Path::new(
            self.repository
                .strip_prefix("file://")
                .unwrap_or(&self.repository),
        );
        repository_exists(path).then(|| path.to_path_buf())
    }
}

impl Scm for Git {
    fn query_revision(
        &self,
        reference: &str,
        shell: &dyn ShellCapture,
    ) -> Result<Revision, ScmError> {
        validate_reference(reference)?;

        if is_full_sha(reference) {
            return parse_revision(reference);
        }

        if let Some(path) = self.local_repository() {
            log::debug!("resolving {} in local repository {}", reference, path.display());
            return resolve_local(&path, reference);
        }

        let output = shell.capture(&self.command([
            "ls-remote",
            self.repository.as_str(),
            reference,
        ]))?;
        let sha = parse_ls_remote(&output, reference)
            .ok_or_else(|| ScmError::UnknownReference(reference.to_string()))?;
        parse_revision(&sha)
    }

    fn checkout(&self, revision: &Revision, destination: &Path) -> Result<ShellCommand, ScmError> {
        let destination = path_arg(destination)?;

        let mut clone = vec!["clone".to_string(), "-q".to_string()];
        if let Some(depth) = self.depth {
            clone.push("--depth".into());
            clone.push(depth.to_string());
        }
        if let Some(branch) = &self.branch {
            clone.push("--branch".into());
            clone.push(branch.clone());
        }
        if let Some(remote) = &self.remote {
            clone.push("--origin".into());
            clone.push(remote.clone());
        }
        clone.push("--".into());
        clone.push(self.repository.clone());
        clone.push(destination.clone());

        let mut command = self
            .command(clone)
            .and(["cd", destination.as_str()])
            .and_then(self.command(["checkout", "-q", "-b", DEPLOY_BRANCH, revision.as_str()]));

        if self.submodules {
            command = command
                .and_then(self.command(["submodule", "-q", "init"]))
                .and_then(self.command(["submodule", "-q", "sync"]))
                .and_then(self.command(["submodule", "-q", "update", "--init", "--recursive"]));
        }

        Ok(command)
    }
}

fn is_full_sha(reference: &str) -> bool {
    reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// Pick the commit for `reference` from `git ls-remote` output.
///
/// Follows git's lookup order: an exact ref name, then a tag (preferring the
/// peeled `^{}` entry of annotated tags), then a branch.
pub(crate) fn parse_ls_remote(output: &str, reference: &str) -> Option<String> {
    let refs: Vec<(&str, &str)> = output
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(sha, name)| (sha.trim(), name.trim()))
        .collect();

    let find = |name: &str| {
        refs.iter()
            .find(|(_, n)| *n == name)
            .map(|(sha, _)| sha.to_string())
    };
    let peeled = |name: &str| find(&format!("{}^{{}}", name)).or_else(|| find(name));

    if reference == "HEAD" || reference.starts_with("refs/") {
        return peeled(reference);
    }

    peeled(&format!("refs/tags/{}", reference))
        .or_else(|| find(&format!("refs/heads/{}", reference)))
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, ScmError> {
    Repository::open(path).map_err(ScmError::Git)
}

/// Check if a path contains a valid git repository.
pub fn repository_exists(path: &Path) -> bool {
    path.exists() && Repository::open(path).is_ok()
}

/// Resolve `reference` to a commit SHA in a repository on disk.
pub fn resolve_local(path: &Path, reference: &str) -> Result<Revision, ScmError> {
    let repo = open_repository(path)?;
    let object = repo.revparse_single(reference).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            ScmError::UnknownReference(reference.to_string())
        } else {
            ScmError::Git(e)
        }
    })?;
    let commit = object.peel_to_commit()?;
    parse_revision(&commit.id().to_string())
}
