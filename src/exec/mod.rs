//! Where commands run: the local machine or a fleet of hosts over ssh.
//!
//! Backends describe work as [`ShellCommand`]s so the same checkout can be
//! executed in-process or on a remote host.

mod command;
#[cfg(test)]
pub(crate) mod fake;
mod local;
mod ssh;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::types::ParseError;

pub use command::{ShellCommand, quote};
pub use local::LocalShell;
pub use ssh::SshFleet;

/// Errors from running a command.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The process could not be started.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// The command ran and exited unsuccessfully.
    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    /// Remote execution requested from a context that has no hosts.
    #[error("no remote hosts are configured")]
    NoRemote,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into [`ExecError::Failed`], otherwise return stdout.
    pub fn into_result(self, command: &ShellCommand) -> Result<String, ExecError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(ExecError::Failed {
                command: command.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// An ssh destination (`host` or `user@host`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host(String);

impl Host {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Host {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        // A leading dash would be read by ssh as an option.
        if s.starts_with('-') {
            return Err(ParseError::InvalidStart('-'));
        }
        if let Some(c) = s.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(ParseError::InvalidCharacter(c));
        }
        Ok(Host(s.to_string()))
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs commands locally and, in fleet mode, on each remote host.
///
/// `run_*` return `Ok` for any command that ran to completion, whatever its
/// exit status; `Err` means it could not be run at all.
pub trait ExecutionContext {
    /// True when modules are published into the local project tree.
    fn is_local(&self) -> bool;

    /// The remote hosts, in the order they are processed. Empty in local mode.
    fn hosts(&self) -> &[Host];

    fn run_local(&self, command: &ShellCommand) -> Result<CommandOutput, ExecError>;

    fn run_remote(&self, host: &Host, command: &ShellCommand)
    -> Result<CommandOutput, ExecError>;
}

impl<T: ExecutionContext + ?Sized> ExecutionContext for &T {
    fn is_local(&self) -> bool {
        (**self).is_local()
    }

    fn hosts(&self) -> &[Host] {
        (**self).hosts()
    }

    fn run_local(&self, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        (**self).run_local(command)
    }

    fn run_remote(&self, host: &Host, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        (**self).run_remote(host, command)
    }
}

/// Read-only command capability handed to backends for revision lookups.
pub trait ShellCapture {
    /// Run `command` locally and return its stdout, failing on non-zero exit.
    fn capture(&self, command: &ShellCommand) -> Result<String, ExecError>;
}

impl<T: ExecutionContext + ?Sized> ShellCapture for T {
    fn capture(&self, command: &ShellCommand) -> Result<String, ExecError> {
        log::debug!("capturing: {}", command);
        self.run_local(command)?.into_result(command)
    }
}
