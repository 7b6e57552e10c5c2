//! Module definitions as read from `config/externals.yml`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_yaml::Value;

use crate::types::{BackendKind, ModulePath, OptionKey};

/// Reference used when a module does not name a `:revision`.
pub const DEFAULT_REVISION: &str = "HEAD";

/// One external module: which backend, which revision, and the backend's options.
///
/// The options map keeps every key of the entry, including `:type` and
/// `:revision`, so backends see the same view the file gives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSpec {
    pub backend: BackendKind,
    pub revision: String,
    pub options: BTreeMap<OptionKey, Value>,
}

impl ModuleSpec {
    /// Create a spec with no extra options.
    pub fn new(backend: BackendKind, revision: impl Into<String>) -> Self {
        Self {
            backend,
            revision: revision.into(),
            options: BTreeMap::new(),
        }
    }

    /// Add an option. `name` is the bare symbol name, without the colon.
    pub fn with_option(mut self, name: &str, value: impl Into<Value>) -> Self {
        if let Ok(key) = format!(":{}", name).parse() {
            self.options.insert(key, value.into());
        }
        self
    }

    /// Look up an option by its bare name.
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| value)
    }

    /// Scalar option rendered as a string. Sequences and mappings yield `None`.
    pub fn option_str(&self, name: &str) -> Option<String> {
        self.option(name).and_then(scalar_to_string)
    }

    /// Boolean option. YAML booleans and the strings `true`/`yes`/`1` count as set.
    pub fn option_bool(&self, name: &str) -> bool {
        match self.option(name) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
            Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
            _ => false,
        }
    }
}

/// Render a YAML scalar the way it would be written on a command line.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Human readable form of a mapping key for error messages.
pub(crate) fn describe_key(key: &Value) -> String {
    match key {
        Value::String(s) => format!("{:?}", s),
        Value::Null => "null".to_string(),
        other => scalar_to_string(other).unwrap_or_else(|| "<complex key>".to_string()),
    }
}

/// The ordered set of modules for one run. Iteration follows file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExternalModules {
    entries: Vec<(ModulePath, ModuleSpec)>,
}

impl ExternalModules {
    /// An empty module set, used when a project defines no externals.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert or replace a module, keeping the position of an existing entry.
    pub fn insert(&mut self, path: ModulePath, spec: ModuleSpec) {
        match self.entries.iter_mut().find(|(p, _)| *p == path) {
            Some(entry) => entry.1 = spec,
            None => self.entries.push((path, spec)),
        }
    }

    pub fn get(&self, path: &ModulePath) -> Option<&ModuleSpec> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, spec)| spec)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ModulePath, &ModuleSpec)> {
        self.entries.iter().map(|(path, spec)| (path, spec))
    }

    pub fn paths(&self) -> impl Iterator<Item = &ModulePath> {
        self.entries.iter().map(|(path, _)| path)
    }

    /// Keep only the modules for which `keep` returns true.
    pub(crate) fn retain(mut self, mut keep: impl FnMut(&ModulePath) -> bool) -> Self {
        self.entries.retain(|(path, _)| keep(path));
        self
    }
}

impl FromIterator<(ModulePath, ModuleSpec)> for ExternalModules {
    fn from_iter<I: IntoIterator<Item = (ModulePath, ModuleSpec)>>(iter: I) -> Self {
        let mut modules = Self::empty();
        for (path, spec) in iter {
            modules.insert(path, spec);
        }
        modules
    }
}
