//! Allow-list of permitted command values (verbs, resources, namespaces).
//!
//! Loaded once at startup from a YAML document and shared read-only for the
//! lifetime of the process. Membership checks are case-insensitive.

use crate::config::ConfigError;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Which position of a command a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandField {
    Verb,
    Resource,
    Namespace,
}

impl CommandField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandField::Verb => "verb",
            CommandField::Resource => "resource",
            CommandField::Namespace => "namespace",
        }
    }
}

impl fmt::Display for CommandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk shape of the permissions file. All three keys are required.
#[derive(Debug, Deserialize)]
struct PermissionsFile {
    verbs: Vec<String>,
    resources: Vec<String>,
    namespaces: Vec<String>,
}

/// One field's permitted values: original spelling for display, folded set for lookup.
#[derive(Debug, Clone, Default)]
struct FieldSet {
    values: Vec<String>,
    folded: HashSet<String>,
}

impl FieldSet {
    fn new(values: Vec<String>) -> Self {
        let folded = values.iter().map(|v| v.to_lowercase()).collect();
        Self { values, folded }
    }

    fn contains(&self, value: &str) -> bool {
        self.folded.contains(&value.to_lowercase())
    }
}

/// Permitted values per command field. There is no mutation API; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    verbs: FieldSet,
    resources: FieldSet,
    namespaces: FieldSet,
}

impl AllowList {
    pub fn new(verbs: Vec<String>, resources: Vec<String>, namespaces: Vec<String>) -> Self {
        Self {
            verbs: FieldSet::new(verbs),
            resources: FieldSet::new(resources),
            namespaces: FieldSet::new(namespaces),
        }
    }

    /// Read and parse the permissions file. Any failure here is fatal for startup.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let list = Self::from_yaml_str(&s).map_err(|source| ConfigError::AllowList {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!(
            "loaded permissions from {}: {} verb(s), {} resource(s), {} namespace(s)",
            path.display(),
            list.verbs.values.len(),
            list.resources.values.len(),
            list.namespaces.values.len()
        );
        Ok(list)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, serde_yaml::Error> {
        let file: PermissionsFile = serde_yaml::from_str(s)?;
        Ok(Self::new(file.verbs, file.resources, file.namespaces))
    }

    /// True if `value` is permitted for `field`, ignoring case.
    pub fn contains(&self, field: CommandField, value: &str) -> bool {
        self.field(field).contains(value)
    }

    /// Configured values for `field`, in file order and original casing.
    pub fn values(&self, field: CommandField) -> &[String] {
        &self.field(field).values
    }

    fn field(&self, field: CommandField) -> &FieldSet {
        match field {
            CommandField::Verb => &self.verbs,
            CommandField::Resource => &self.resources,
            CommandField::Namespace => &self.namespaces,
        }
    }
}
