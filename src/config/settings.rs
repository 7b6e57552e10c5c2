//! Run settings: where the project lives and where its externals go.

use std::path::{Path, PathBuf};

use super::{ConfigError, DEFAULT_CONFIG_FILE};
use crate::exec::Host;

/// Remote deployment settings.
///
/// Paths are interpreted on each host, so they must be absolute.
#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub hosts: Vec<Host>,
    /// Shared directory that outlives releases; slots live under `externals/`.
    pub shared_path: PathBuf,
    /// The release tree the modules are linked into.
    pub release_path: PathBuf,
    /// Extra `-o` options for `ssh`.
    pub ssh_options: Vec<String>,
}

impl FleetSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::Settings(
                "at least one --host is required (or pass --local)".to_string(),
            ));
        }
        for (flag, path) in [
            ("--shared-path", &self.shared_path),
            ("--release-path", &self.release_path),
        ] {
            if !path.is_absolute() {
                return Err(ConfigError::Settings(format!(
                    "{} must be an absolute path, got {}",
                    flag,
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Where the externals are set up.
#[derive(Debug, Clone)]
pub enum Target {
    /// This machine, inside the project root.
    Local,
    /// Every host of a fleet, over ssh.
    Fleet(FleetSettings),
}

/// Settings for one run, built once from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    project_root: PathBuf,
    config_path: PathBuf,
    shared_root: PathBuf,
    target: Target,
    keep_going: bool,
}

impl Settings {
    /// Settings for a local run rooted at `project_root`.
    ///
    /// The shared root defaults to `../shared` next to the project root.
    pub fn local(project_root: &Path) -> Result<Self, ConfigError> {
        let project_root = canonical_root(project_root)?;
        let shared_root = project_root
            .parent()
            .unwrap_or(&project_root)
            .join("shared");

        Ok(Self {
            config_path: project_root.join(DEFAULT_CONFIG_FILE),
            project_root,
            shared_root,
            target: Target::Local,
            keep_going: false,
        })
    }

    /// Settings for a fleet run. Module definitions are still read from the
    /// local `project_root`.
    pub fn fleet(project_root: &Path, fleet: FleetSettings) -> Result<Self, ConfigError> {
        fleet.validate()?;
        let project_root = canonical_root(project_root)?;

        Ok(Self {
            config_path: project_root.join(DEFAULT_CONFIG_FILE),
            project_root,
            shared_root: fleet.shared_path.clone(),
            target: Target::Fleet(fleet),
            keep_going: false,
        })
    }

    /// Read module definitions from `path`; relative paths are taken from the project root.
    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = self.project_root.join(path);
        self
    }

    /// Override the local shared root. Ignored for fleet runs, which use `--shared-path`.
    pub fn with_shared_root(mut self, path: impl AsRef<Path>) -> Self {
        if matches!(self.target, Target::Local) {
            self.shared_root = self.project_root.join(path);
        }
        self
    }

    /// Process the remaining modules after a failure instead of stopping.
    pub fn with_keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Root of the checkout cache, on this machine or on each host.
    pub fn shared_root(&self) -> &Path {
        &self.shared_root
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn keep_going(&self) -> bool {
        self.keep_going
    }
}

fn canonical_root(path: &Path) -> Result<PathBuf, ConfigError> {
    std::fs::canonicalize(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
