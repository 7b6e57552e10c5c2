use std::process::{Command, Stdio};

use super::local::run_sh;
use super::{CommandOutput, ExecError, ExecutionContext, Host, ShellCommand};

/// Runs remote commands with the system `ssh` client, one host at a time.
///
/// Local commands (revision lookups) still run on this machine.
#[derive(Debug, Clone)]
pub struct SshFleet {
    hosts: Vec<Host>,
    options: Vec<String>,
}

impl SshFleet {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self {
            hosts,
            options: Vec::new(),
        }
    }

    /// Extra `-o` options passed to every ssh invocation (e.g. `Port=2222`).
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    fn ssh_command(&self, host: &Host, script: &str) -> Command {
        let mut cmd = Command::new("ssh");
        // Never prompt: a deploy must not hang waiting for a password.
        cmd.args(["-o", "BatchMode=yes"]);
        for option in &self.options {
            cmd.arg("-o").arg(option);
        }
        cmd.arg(host.as_str()).arg(script).stdin(Stdio::null());
        cmd
    }
}

impl ExecutionContext for SshFleet {
    fn is_local(&self) -> bool {
        false
    }

    fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    fn run_local(&self, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        run_sh(command, None)
    }

    fn run_remote(&self, host: &Host, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        log::debug!("running on {}: {}", host, command);

        let output = self
            .ssh_command(host, &command.render())
            .output()
            .map_err(|source| ExecError::Spawn {
                command: format!("ssh {} {}", host, command),
                source,
            })?;
        Ok(output.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> SshFleet {
        SshFleet::new(vec!["app1".parse().unwrap(), "deploy@app2".parse().unwrap()])
            .with_options(vec!["Port=2222".to_string()])
    }

    #[test]
    fn is_remote_with_hosts_in_order() {
        let fleet = fleet();
        assert!(!fleet.is_local());
        let hosts: Vec<_> = fleet.hosts().iter().map(|h| h.as_str()).collect();
        assert_eq!(hosts, vec!["app1", "deploy@app2"]);
    }

    #[test]
    fn ssh_command_passes_script_as_single_argument() {
        let fleet = fleet();
        let host: Host = "app1".parse().unwrap();
        let cmd = fleet.ssh_command(&host, "rm -rf '/srv/a b'");
        assert_eq!(cmd.get_program(), "ssh");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["-o", "BatchMode=yes", "-o", "Port=2222", "app1", "rm -rf '/srv/a b'"]
        );
    }

    #[test]
    fn local_commands_run_on_this_machine() {
        let fleet = fleet();
        let output = fleet.run_local(&ShellCommand::new(["true"])).unwrap();
        assert!(output.success());
    }
}
