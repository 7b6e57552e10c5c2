//! Loading and filtering the external module definitions.
//!
//! The definitions live in `config/externals.yml`, keyed by destination path:
//!
//! ```yaml
//! vendor/rails:
//!   :type: git
//!   :repository: https://github.com/rails/rails.git
//!   :revision: v7.1.0
//! ```
//!
//! Option keys are symbols (leading colon). A project without the file simply
//! has no externals.

mod filter;
mod schema;
mod settings;

use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;

use crate::scm::ScmError;
use crate::types::{ModulePath, OptionKey, ParseError};

pub use filter::{ModuleFilter, EXCEPT_ENV, ONLY_ENV};
pub use schema::{DEFAULT_REVISION, ExternalModules, ModuleSpec};
pub use settings::{FleetSettings, Settings, Target};

use schema::{describe_key, scalar_to_string};

/// Default location of the module definitions, relative to the project root.
pub const DEFAULT_CONFIG_FILE: &str = "config/externals.yml";

/// Errors found while loading or validating the module definitions.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading the definitions file failed for a reason other than absence.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A module key is not a usable destination path.
    #[error("invalid module path {path:?}: {source}")]
    InvalidPath {
        path: String,
        #[source]
        source: ParseError,
    },
    /// A module's value is not a mapping of options.
    #[error("the options for {module} must be a mapping")]
    InvalidEntry { module: ModulePath },
    /// Option keys that are not symbols.
    #[error(
        "the externals file must use symbols for the option keys (found [{}] under {module})",
        .keys.join(", ")
    )]
    InvalidOptionKeys { module: ModulePath, keys: Vec<String> },
    /// A required option is absent.
    #[error("{module} is missing the required :{key} option")]
    MissingOption {
        module: ModulePath,
        key: &'static str,
    },
    /// An option has a value of the wrong shape.
    #[error("invalid :{key} for {module}: {reason}")]
    InvalidOption {
        module: ModulePath,
        key: &'static str,
        reason: String,
    },
    /// A filter pattern is not a valid regular expression.
    #[error("invalid module pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// The module's backend cannot be set up from its options.
    #[error("cannot configure {module}: {source}")]
    Backend {
        module: ModulePath,
        #[source]
        source: ScmError,
    },
    /// One module's destination lies inside another's.
    #[error("{inner} is inside {outer}; external modules cannot be nested")]
    NestedModules { outer: ModulePath, inner: ModulePath },
    /// The run settings are incomplete or inconsistent.
    #[error("invalid settings: {0}")]
    Settings(String),
}

impl ExternalModules {
    /// Load module definitions from `path`.
    ///
    /// A missing file yields an empty set. So does a file that is not valid
    /// YAML or whose top level is not a mapping; that case is logged. Entries
    /// that parse but break the option rules are errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no externals defined ({} not found)", path.display());
                return Ok(Self::empty());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Self::parse(&content).inspect_err(|e| log::debug!("rejecting {}: {}", path.display(), e))
    }

    /// Parse module definitions from YAML text. See [`ExternalModules::load`].
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let document: Value = match serde_yaml::from_str(content) {
            Ok(document) => document,
            Err(e) => {
                log::warn!("ignoring unparseable externals definitions: {}", e);
                return Ok(Self::empty());
            }
        };

        let mapping = match document {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Ok(Self::empty()),
            _ => {
                log::warn!("ignoring externals definitions: top level is not a mapping");
                return Ok(Self::empty());
            }
        };

        let mut modules = Self::empty();
        for (key, entry) in mapping {
            let raw_path = scalar_to_string(&key).unwrap_or_else(|| describe_key(&key));
            let module: ModulePath =
                raw_path
                    .parse()
                    .map_err(|source| ConfigError::InvalidPath {
                        path: raw_path.clone(),
                        source,
                    })?;

            let spec = parse_entry(&module, entry)?;
            modules.insert(module, spec);
        }

        modules.check_nesting()?;
        Ok(modules)
    }

    /// Reject a module whose destination is inside another module's.
    ///
    /// The outer destination is a link into a shared cache slot, so anything
    /// placed below it would be written into that slot.
    pub(crate) fn check_nesting(&self) -> Result<(), ConfigError> {
        for outer in self.paths() {
            if let Some(inner) = self.paths().find(|path| outer.encloses(path)) {
                return Err(ConfigError::NestedModules {
                    outer: outer.clone(),
                    inner: inner.clone(),
                });
            }
        }
        Ok(())
    }
}

fn parse_entry(module: &ModulePath, entry: Value) -> Result<ModuleSpec, ConfigError> {
    let Value::Mapping(options) = entry else {
        return Err(ConfigError::InvalidEntry {
            module: module.clone(),
        });
    };

    let mut parsed = Vec::with_capacity(options.len());
    let mut invalid = Vec::new();
    for (key, value) in options {
        match key.as_str().map(str::parse::<OptionKey>) {
            Some(Ok(key)) => parsed.push((key, value)),
            _ => invalid.push(describe_key(&key)),
        }
    }

    if !invalid.is_empty() {
        return Err(ConfigError::InvalidOptionKeys {
            module: module.clone(),
            keys: invalid,
        });
    }

    let options: std::collections::BTreeMap<_, _> = parsed.into_iter().collect();
    let lookup = |name: &str| {
        options
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| value)
    };

    let backend = match lookup("type") {
        None | Some(Value::Null) => {
            return Err(ConfigError::MissingOption {
                module: module.clone(),
                key: "type",
            });
        }
        Some(value) => scalar_to_string(value)
            .ok_or_else(|| "expected a scalar".to_string())
            .and_then(|s| s.parse().map_err(|e: ParseError| e.to_string()))
            .map_err(|reason| ConfigError::InvalidOption {
                module: module.clone(),
                key: "type",
                reason,
            })?,
    };

    let revision = match lookup("revision") {
        None | Some(Value::Null) => DEFAULT_REVISION.to_string(),
        Some(value) => scalar_to_string(value)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::InvalidOption {
                module: module.clone(),
                key: "revision",
                reason: "expected a non-empty scalar".to_string(),
            })?,
    };

    Ok(ModuleSpec {
        backend,
        revision,
        options,
    })
}
