//! Selecting a subset of modules by path pattern.

use regex::Regex;

use super::{ConfigError, ExternalModules};
use crate::types::ModulePath;

/// Environment variable listing the only modules to process.
pub const ONLY_ENV: &str = "ONLY_MODS";
/// Environment variable listing modules to skip.
pub const EXCEPT_ENV: &str = "EXCEPT_MODS";

/// Include/exclude pattern lists applied to module paths.
///
/// Patterns are unanchored regular expressions: `solr` matches
/// `vendor/plugins/solr`. Exclusion is applied after inclusion, so a path
/// matching both lists is dropped.
#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    include: Option<Vec<Regex>>,
    exclude: Option<Vec<Regex>>,
}

impl ModuleFilter {
    /// Build a filter from comma-delimited pattern lists.
    ///
    /// A list that is absent or contains no non-empty entries is treated as
    /// not given.
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, ConfigError> {
        Ok(Self {
            include: include.map(parse_patterns).transpose()?.flatten(),
            exclude: exclude.map(parse_patterns).transpose()?.flatten(),
        })
    }

    /// Like [`ModuleFilter::new`], reading a list that is not given from
    /// `ONLY_MODS` or `EXCEPT_MODS` instead.
    pub fn with_env_fallback(
        include: Option<&str>,
        exclude: Option<&str>,
    ) -> Result<Self, ConfigError> {
        Self::with_fallback(include, exclude, |name| std::env::var(name).ok())
    }

    fn with_fallback(
        include: Option<&str>,
        exclude: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let only = lookup(ONLY_ENV);
        let except = lookup(EXCEPT_ENV);
        Self::new(include.or(only.as_deref()), exclude.or(except.as_deref()))
    }

    /// True when neither list is given.
    pub fn is_identity(&self) -> bool {
        self.include.is_none() && self.exclude.is_none()
    }

    /// Whether a module at `path` survives the filter.
    pub fn matches(&self, path: &ModulePath) -> bool {
        let path = path.as_str();
        let hit = |patterns: &Vec<Regex>| patterns.iter().any(|p| p.is_match(path));
        self.include.as_ref().is_none_or(hit) && !self.exclude.as_ref().is_some_and(hit)
    }

    /// Apply the filter, preserving module order.
    pub fn apply(&self, modules: ExternalModules) -> ExternalModules {
        if self.is_identity() {
            return modules;
        }
        let before = modules.len();
        let filtered = modules.retain(|path| self.matches(path));
        log::debug!("module filter kept {} of {} modules", filtered.len(), before);
        filtered
    }
}

fn parse_patterns(list: &str) -> Result<Option<Vec<Regex>>, ConfigError> {
    let patterns = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Regex::new(s).map_err(|source| ConfigError::InvalidPattern {
                pattern: s.to_string(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(if patterns.is_empty() {
        None
    } else {
        Some(patterns)
    })
}
