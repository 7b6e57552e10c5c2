use std::path::{Path, PathBuf};

use super::{PublishError, RemoteStep};
use crate::cache::{SlotPaths, unique_suffix};
use crate::exec::{CommandOutput, ExecutionContext, Host, ShellCommand, quote};
use crate::scm::Scm;
use crate::types::{ModulePath, Revision};

/// Result of setting a module up on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutcome {
    /// Slot directory on the host.
    pub slot: PathBuf,
    /// Whether the checkout ran on this host.
    pub fresh: bool,
}

/// Sets modules up on remote hosts through an [`ExecutionContext`].
///
/// Each module is a fixed sequence of [`RemoteStep`]s, run one command at a
/// time so a failure names the step that broke. Hosts share nothing.
#[derive(Debug, Clone)]
pub struct RemotePublisher {
    shared: SlotPaths,
    release_path: PathBuf,
}

impl RemotePublisher {
    /// `shared_root` and `release_path` are paths on the hosts.
    pub fn new(shared_root: impl Into<PathBuf>, release_path: impl Into<PathBuf>) -> Self {
        Self {
            shared: SlotPaths::new(shared_root),
            release_path: release_path.into(),
        }
    }

    pub fn destination(&self, module: &ModulePath) -> PathBuf {
        self.release_path.join(module.as_path())
    }

    /// Check `revision` of `module` out on `host` if needed and link it.
    pub fn publish(
        &self,
        context: &dyn ExecutionContext,
        host: &Host,
        module: &ModulePath,
        revision: &Revision,
        scm: &dyn Scm,
    ) -> Result<RemoteOutcome, PublishError> {
        let step = Step {
            context,
            host,
            module,
        };
        let destination = self.destination(module);
        let slot = self.shared.slot_dir(module, revision);

        step.run(
            RemoteStep::RemoveDestination,
            &ShellCommand::new(["rm", "-rf", "--", display(&destination).as_str()]),
        )?;
        let module_dir = display(&self.shared.module_dir(module));
        step.run(
            RemoteStep::CreateSharedDir,
            &ShellCommand::new(["mkdir", "-p", "--", module_dir.as_str()]),
        )?;

        let probe = ShellCommand::new(["test", "-d", display(&slot).as_str()]);
        let fresh = match step.exec(RemoteStep::ProbeSlot, &probe)?.code {
            Some(0) => false,
            Some(1) => true,
            code => {
                return Err(step.failed(
                    RemoteStep::ProbeSlot,
                    format!("`{}` exited with {:?}", probe, code),
                ));
            }
        };

        if fresh {
            self.checkout(&step, module, revision, &slot, scm)?;
        } else {
            log::debug!("{} at {} already cached on {}", module, revision, host);
        }

        let parent = destination.parent().unwrap_or(Path::new("/"));
        step.run(
            RemoteStep::Link,
            &ShellCommand::new(["mkdir", "-p", "--", display(parent).as_str()])
                .and([
                    "ln",
                    "-nsf",
                    "--",
                    display(&slot).as_str(),
                    display(&destination).as_str(),
                ]),
        )?;

        Ok(RemoteOutcome { slot, fresh })
    }

    /// Check out into staging, then move staging into the slot unless another
    /// deploy got there first.
    ///
    /// `mv -T` renames onto the slot path or fails; it never moves staging
    /// inside an existing slot. Losing the race drops staging and succeeds as
    /// long as the slot exists.
    fn checkout(
        &self,
        step: &Step<'_>,
        module: &ModulePath,
        revision: &Revision,
        slot: &Path,
        scm: &dyn Scm,
    ) -> Result<(), PublishError> {
        let staging = self
            .shared
            .staging_dir(module, revision, &unique_suffix());
        let command = scm
            .checkout(revision, &staging)
            .map_err(|e| step.failed(RemoteStep::Checkout, e.to_string()))?;

        log::info!("checking out {} at {} on {}", module, revision, step.host);
        if let Err(e) = step.run(RemoteStep::Checkout, &command) {
            let cleanup = ShellCommand::new(["rm", "-rf", "--", display(&staging).as_str()]);
            if let Err(cleanup_err) = step.run(RemoteStep::Checkout, &cleanup) {
                log::warn!("{}", cleanup_err);
            }
            return Err(e);
        }

        let (staging, slot) = (quote(&display(&staging)), quote(&display(slot)));
        step.run(
            RemoteStep::PublishSlot,
            &ShellCommand::script(format!(
                "mv -T -- {staging} {slot} 2>/dev/null || {{ rm -rf -- {staging}; [ -d {slot} ]; }}"
            )),
        )
    }
}

/// Runs the steps for one module on one host.
struct Step<'a> {
    context: &'a dyn ExecutionContext,
    host: &'a Host,
    module: &'a ModulePath,
}

impl Step<'_> {
    fn exec(&self, step: RemoteStep, command: &ShellCommand) -> Result<CommandOutput, PublishError> {
        log::debug!("[{}] {}: {}", self.host, step, command);
        self.context
            .run_remote(self.host, command)
            .map_err(|e| self.failed(step, e.to_string()))
    }

    fn run(&self, step: RemoteStep, command: &ShellCommand) -> Result<(), PublishError> {
        self.exec(step, command)?
            .into_result(command)
            .map(drop)
            .map_err(|e| self.failed(step, e.to_string()))
    }

    fn failed(&self, step: RemoteStep, reason: String) -> PublishError {
        PublishError::Remote {
            module: self.module.clone(),
            host: self.host.clone(),
            step,
            reason,
        }
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
