//! Shared types for cached-externals

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("path must be relative to the project root")]
    Absolute,
    #[error("path component '{0}' is not allowed")]
    InvalidComponent(String),
    #[error("option keys must be symbols written as ':name'")]
    NotSymbol,
}

fn reject_control(s: &str) -> Result<(), ParseError> {
    match s.chars().find(|c| c.is_control()) {
        Some(c) => Err(ParseError::InvalidCharacter(c)),
        None => Ok(()),
    }
}

/// Destination of an external module, relative to the project root.
///
/// Validation rules:
/// - Non-empty, relative
/// - No empty, `.` or `..` components
/// - No control characters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ModulePath(String);

impl ModulePath {
    /// Returns the module path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the module path as a relative filesystem path
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    /// True when `other` lies strictly below this path.
    pub fn encloses(&self, other: &ModulePath) -> bool {
        other
            .0
            .strip_prefix(&self.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl FromStr for ModulePath {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches('/');
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.starts_with('/') {
            return Err(ParseError::Absolute);
        }
        reject_control(s)?;

        for component in s.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(ParseError::InvalidComponent(component.to_string()));
            }
        }

        Ok(ModulePath(s.to_string()))
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A concrete revision produced by a backend (commit SHA, svn revision number).
///
/// Used verbatim as a directory name, so it must be a single safe path component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Returns the revision as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Revision {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if s.starts_with('-') {
            return Err(ParseError::InvalidStart('-'));
        }
        if s.starts_with('.') {
            return Err(ParseError::InvalidStart('.'));
        }
        reject_control(s)?;

        for c in s.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(Revision(s.to_string()))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tag naming a version-control backend (`git`, `subversion`, ...).
///
/// Stored lowercase; the registry is keyed on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BackendKind(String);

impl BackendKind {
    /// Returns the backend tag as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BackendKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `:git` and `git` name the same backend.
        let s = s.trim().trim_start_matches(':');
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        for c in s.chars() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(BackendKind(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A module option key.
///
/// Keys are symbols: in the YAML file they carry a leading colon
/// (`:repository`). Plain string keys are rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OptionKey(String);

impl OptionKey {
    /// Returns the key name without the leading colon
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OptionKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix(':').ok_or(ParseError::NotSymbol)?;
        let first = name.chars().next().ok_or(ParseError::Empty)?;
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(ParseError::InvalidStart(first));
        }

        for c in name.chars() {
            if !c.is_ascii_alphanumeric() && c != '_' {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(OptionKey(name.to_string()))
    }
}

impl fmt::Display for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl Serialize for OptionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
