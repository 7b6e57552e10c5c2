//! Activating a cache slot by linking it at the module's destination.

mod local;
mod remote;
mod swap;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::exec::Host;
use crate::types::ModulePath;

pub use local::LocalPublisher;
pub use remote::{RemoteOutcome, RemotePublisher};
pub use swap::{atomic_symlink_swap, read_symlink_target};

/// One step of setting up a module on a remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStep {
    /// Clear whatever occupies the destination in the release tree.
    RemoveDestination,
    /// Create the module's directory under the shared root.
    CreateSharedDir,
    /// Check whether the slot is already populated.
    ProbeSlot,
    /// Check the revision out into a staging directory.
    Checkout,
    /// Move the staging directory into the slot.
    PublishSlot,
    /// Point the destination at the slot.
    Link,
}

impl fmt::Display for RemoteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RemoveDestination => "remove destination",
            Self::CreateSharedDir => "create shared directory",
            Self::ProbeSlot => "probe cache slot",
            Self::Checkout => "checkout",
            Self::PublishSlot => "publish cache slot",
            Self::Link => "link",
        };
        f.write_str(name)
    }
}

/// Errors from linking a module. Scoped to one module on one target.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to link {module} at {destination}: {source}")]
    Local {
        module: ModulePath,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{module} on {host}: {step} failed: {reason}")]
    Remote {
        module: ModulePath,
        host: Host,
        step: RemoteStep,
        reason: String,
    },
}

impl PublishError {
    pub fn module(&self) -> &ModulePath {
        match self {
            Self::Local { module, .. } | Self::Remote { module, .. } => module,
        }
    }
}
