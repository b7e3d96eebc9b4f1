//! Spec documents: the human-authored declaration of desired resources.
//!
//! A spec groups resources by kind, then by name:
//!
//! ```toml
//! version = "1"
//!
//! [resources.feature.auth_login]
//! files = ["src/auth/login.rs"]
//! symbols = ["login"]
//!
//! [resources.feature.auth_refresh]
//! depends_on = ["feature.auth_login"]
//! ```
//!
//! JSON documents with the same shape are accepted too.

use crate::error::{ConvergeError, Result};
use crate::model::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Default spec document version
pub const SPEC_VERSION: &str = "1";

/// Desired shape of one resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub depends_on: BTreeSet<Address>,

    /// Files expected to implement the resource
    #[serde(default)]
    pub files: Vec<String>,

    /// Symbol names expected to exist once implemented
    #[serde(default)]
    pub symbols: BTreeSet<String>,
}

impl ResourceSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dependency(mut self, address: Address) -> Self {
        self.depends_on.insert(address);
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbols.insert(symbol.into());
        self
    }

    /// String attribute lookup (e.g. `description`)
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Kind of state storage named by a spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Memory,
}

/// Optional `[backend]` table of a spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type", default)]
    pub kind: BackendKind,

    /// State file path, relative to the spec's directory
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Use a lock file next to the state file
    #[serde(default = "default_lock")]
    pub lock: bool,
}

fn default_lock() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Local,
            path: None,
            lock: true,
        }
    }
}

/// Declared desired state. Immutable for the duration of a planning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    pub version: String,
    pub resources: BTreeMap<Address, ResourceSpec>,
    pub backend: Option<BackendConfig>,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            version: SPEC_VERSION.to_string(),
            resources: BTreeMap::new(),
            backend: None,
        }
    }
}

/// On-disk layout: `resources.<kind>.<name>`
#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct SpecDocument {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    backend: Option<BackendConfig>,
    #[serde(default)]
    resources: BTreeMap<String, BTreeMap<String, ResourceSpec>>,
}

fn default_version() -> String {
    SPEC_VERSION.to_string()
}

impl Spec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used mostly by tests and `init`
    pub fn with(mut self, address: Address, resource: ResourceSpec) -> Self {
        self.resources.insert(address, resource);
        self
    }

    pub fn get(&self, address: &Address) -> Option<&ResourceSpec> {
        self.resources.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.resources.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Load a spec file, choosing the syntax from the extension (`.json` or TOML)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConvergeError::Spec {
            message: format!("cannot read {}: {e}", path.display()),
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let spec = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        };
        spec.map_err(|e| match e {
            ConvergeError::Spec { message } => ConvergeError::Spec {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let doc: SpecDocument = toml::from_str(content).map_err(|e| ConvergeError::Spec {
            message: e.to_string(),
        })?;
        Self::from_document(doc)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let doc: SpecDocument =
            serde_json::from_str(content).map_err(|e| ConvergeError::Spec {
                message: e.to_string(),
            })?;
        Self::from_document(doc)
    }

    /// Render as TOML in the nested document layout
    pub fn to_toml_string(&self) -> Result<String> {
        let mut resources: BTreeMap<String, BTreeMap<String, ResourceSpec>> = BTreeMap::new();
        for (address, resource) in &self.resources {
            resources
                .entry(address.kind().to_string())
                .or_default()
                .insert(address.name().to_string(), resource.clone());
        }
        let doc = SpecDocument {
            version: self.version.clone(),
            backend: self.backend.clone(),
            resources,
        };
        toml::to_string_pretty(&doc).map_err(|e| ConvergeError::Spec {
            message: e.to_string(),
        })
    }

    fn from_document(doc: SpecDocument) -> Result<Self> {
        let mut resources = BTreeMap::new();
        for (kind, named) in doc.resources {
            for (name, resource) in named {
                let address = Address::new(kind.as_str(), name)?;
                resources.insert(address, resource);
            }
        }
        Ok(Self {
            version: doc.version,
            resources,
            backend: doc.backend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
version = "1"

[backend]
type = "local"
path = "state.json"

[resources.feature.auth_login]
files = ["src/auth/login.rs"]
symbols = ["login", "verify_password"]

[resources.feature.auth_login.attributes]
description = "User login"

[resources.feature.auth_refresh]
depends_on = ["feature.auth_login"]
"#;

    #[test]
    fn test_parse_toml_spec() {
        let spec = Spec::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(spec.len(), 2);

        let login: Address = "feature.auth_login".parse().unwrap();
        let refresh: Address = "feature.auth_refresh".parse().unwrap();

        let r = spec.get(&login).unwrap();
        assert_eq!(r.files, vec!["src/auth/login.rs".to_string()]);
        assert!(r.symbols.contains("verify_password"));
        assert_eq!(r.attribute_str("description"), Some("User login"));

        assert!(spec.get(&refresh).unwrap().depends_on.contains(&login));

        let backend = spec.backend.unwrap();
        assert_eq!(backend.kind, BackendKind::Local);
        assert!(backend.lock);
    }

    #[test]
    fn test_parse_json_spec() {
        let json = r#"{
            "resources": {
                "module": {"payments": {"depends_on": []}}
            }
        }"#;
        let spec = Spec::from_json_str(json).unwrap();
        assert_eq!(spec.version, SPEC_VERSION);
        assert!(spec.contains(&"module.payments".parse().unwrap()));
        assert!(spec.backend.is_none());
    }

    #[test]
    fn test_malformed_address_is_spec_error() {
        let bad = r#"
[resources.feature.login]
depends_on = ["nodot"]
"#;
        let err = Spec::from_toml_str(bad).unwrap_err();
        assert!(matches!(err, ConvergeError::Spec { .. }));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let bad = r#"
[resources.feature.login]
depend_on = ["feature.other"]
"#;
        assert!(Spec::from_toml_str(bad).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let spec = Spec::from_toml_str(EXAMPLE).unwrap();
        let rendered = spec.to_toml_string().unwrap();
        assert_eq!(Spec::from_toml_str(&rendered).unwrap(), spec);
    }

    #[test]
    fn test_load_picks_syntax_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.json");
        std::fs::write(&path, r#"{"resources": {"feature": {"a": {}}}}"#).unwrap();
        let spec = Spec::load(&path).unwrap();
        assert_eq!(spec.len(), 1);

        let missing = Spec::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("nope.toml"));
    }
}
