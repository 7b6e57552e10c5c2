//! Recording execution context for tests.

use std::cell::RefCell;

use super::{CommandOutput, ExecError, ExecutionContext, Host, ShellCommand};

struct Rule {
    host: Option<Host>,
    pattern: &'static str,
    code: i32,
}

/// Records every command and answers with exit codes picked by substring rules.
///
/// Commands that match no rule succeed with empty output.
pub(crate) struct RecordingFleet {
    hosts: Vec<Host>,
    rules: Vec<Rule>,
    calls: RefCell<Vec<(Option<Host>, String)>>,
}

impl RecordingFleet {
    pub(crate) fn new(hosts: &[&str]) -> Self {
        Self {
            hosts: hosts.iter().map(|h| h.parse().unwrap()).collect(),
            rules: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Commands containing `pattern` exit with `code` on every host.
    pub(crate) fn exit(mut self, pattern: &'static str, code: i32) -> Self {
        self.rules.push(Rule {
            host: None,
            pattern,
            code,
        });
        self
    }

    /// Commands containing `pattern` exit with `code` on `host` only.
    pub(crate) fn exit_on(mut self, host: &str, pattern: &'static str, code: i32) -> Self {
        self.rules.push(Rule {
            host: Some(host.parse().unwrap()),
            pattern,
            code,
        });
        self
    }

    /// Remote commands, in order.
    pub(crate) fn commands(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|(host, _)| host.is_some())
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Remote commands sent to `host`, in order.
    pub(crate) fn commands_for(&self, host: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|(h, _)| h.as_ref().is_some_and(|h| h.as_str() == host))
            .map(|(_, command)| command.clone())
            .collect()
    }

    /// Hosts in the order they were contacted, local calls omitted.
    pub(crate) fn host_order(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|(host, _)| host.as_ref().map(|h| h.to_string()))
            .collect()
    }

    fn answer(&self, host: Option<&Host>, command: &ShellCommand) -> CommandOutput {
        let rendered = command.render();
        self.calls
            .borrow_mut()
            .push((host.cloned(), rendered.clone()));
        let code = self
            .rules
            .iter()
            .find(|rule| {
                rendered.contains(rule.pattern)
                    && rule.host.as_ref().is_none_or(|h| Some(h) == host)
            })
            .map_or(0, |rule| rule.code);
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: if code == 0 {
                String::new()
            } else {
                "simulated failure".to_string()
            },
        }
    }
}

impl ExecutionContext for RecordingFleet {
    fn is_local(&self) -> bool {
        self.hosts.is_empty()
    }

    fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    fn run_local(&self, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        Ok(self.answer(None, command))
    }

    fn run_remote(&self, host: &Host, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        Ok(self.answer(Some(host), command))
    }
}
