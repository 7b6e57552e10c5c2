//! Subversion backend driven entirely through the `svn` CLI.

use std::path::Path;

use super::{Scm, ScmError, path_arg, parse_revision, required_option, validate_reference};
use crate::config::ModuleSpec;
use crate::exec::{ShellCapture, ShellCommand};
use crate::types::Revision;

/// Subversion backend for one module.
///
/// Options: `:repository` (required), `:scm_username`, `:scm_password`.
#[derive(Debug, Clone)]
pub struct Subversion {
    repository: String,
    username: Option<String>,
    password: Option<String>,
}

impl Subversion {
    pub fn from_spec(spec: &ModuleSpec) -> Result<Self, ScmError> {
        let repository = required_option(spec, "repository")?;
        if repository.starts_with('-') {
            return Err(ScmError::InvalidOption {
                key: "repository",
                reason: "cannot start with '-'".to_string(),
            });
        }

        Ok(Self {
            repository,
            username: spec.option_str("scm_username"),
            password: spec.option_str("scm_password"),
        })
    }

    /// `svn <subcommand> <auth flags> <args>`; flags stay ahead of any `--`.
    fn command<I, S>(&self, subcommand: &str, args: I) -> ShellCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = ShellCommand::new(["svn", subcommand, "--non-interactive"]);
        if let Some(username) = &self.username {
            command = command.args(["--username", username.as_str()]);
        }
        if let Some(password) = &self.password {
            command = command
                .args(["--password"])
                .secret_arg(password.as_str())
                .args(["--no-auth-cache"]);
        }
        command.args(args)
    }
}

impl Scm for Subversion {
    fn query_revision(
        &self,
        reference: &str,
        shell: &dyn ShellCapture,
    ) -> Result<Revision, ScmError> {
        validate_reference(reference)?;

        if reference.chars().all(|c| c.is_ascii_digit()) {
            return parse_revision(reference);
        }

        let output = shell.capture(&self.command(
            "info",
            [format!("-r{}", reference), "--".to_string(), self.repository.clone()],
        ))?;
        let revision = parse_info_revision(&output).ok_or_else(|| {
            ScmError::Parse(format!("no revision in `svn info` output for {}", reference))
        })?;
        parse_revision(revision)
    }

    fn checkout(&self, revision: &Revision, destination: &Path) -> Result<ShellCommand, ScmError> {
        Ok(self.command(
            "checkout",
            [
                "-q".to_string(),
                format!("-r{}", revision),
                "--".to_string(),
                self.repository.clone(),
                path_arg(destination)?,
            ],
        ))
    }
}

/// Extract the `Revision:` value from `svn info` output.
fn parse_info_revision(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Revision:"))
        .map(str::trim)
        .filter(|r| !r.is_empty())
}
