use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{CommandOutput, ExecError, ExecutionContext, Host, ShellCommand};

/// Runs every command with `sh -c` on this machine.
#[derive(Debug, Clone, Default)]
pub struct LocalShell {
    working_dir: Option<PathBuf>,
}

impl LocalShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands from `dir` instead of the process working directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }
}

/// Run a command through `sh -c`, capturing its output.
pub(super) fn run_sh(
    command: &ShellCommand,
    working_dir: Option<&Path>,
) -> Result<CommandOutput, ExecError> {
    log::debug!("running: {}", command);

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command.render()).stdin(Stdio::null());
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().map_err(|source| ExecError::Spawn {
        command: command.to_string(),
        source,
    })?;
    Ok(output.into())
}

impl ExecutionContext for LocalShell {
    fn is_local(&self) -> bool {
        true
    }

    fn hosts(&self) -> &[Host] {
        &[]
    }

    fn run_local(&self, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        run_sh(command, self.working_dir.as_deref())
    }

    fn run_remote(&self, _host: &Host, _command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        Err(ExecError::NoRemote)
    }
}
