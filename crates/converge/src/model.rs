//! Core data model: addresses, resources, recorded state and mutations.

use crate::error::{ConvergeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Current on-disk state document version
pub const STATE_VERSION: &str = "1";

// ============================================================================
// Address
// ============================================================================

/// Unique `(kind, name)` key of a trackable resource.
///
/// The textual form is `kind.name`; parsing splits on the first `.`, so the
/// kind may not contain dots while the name may.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    kind: String,
    name: String,
}

impl Address {
    /// Build an address from its parts
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        let name = name.into();

        if kind.is_empty() || kind.contains('.') || kind.contains(char::is_whitespace) {
            return Err(ConvergeError::Spec {
                message: format!("invalid resource kind '{kind}'"),
            });
        }
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ConvergeError::Spec {
                message: format!("invalid resource name '{name}' for kind '{kind}'"),
            });
        }

        Ok(Self { kind, name })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for Address {
    type Err = ConvergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((kind, name)) => Self::new(kind, name),
            None => Err(ConvergeError::Spec {
                message: format!("address '{s}' is not of the form kind.name"),
            }),
        }
    }
}

impl TryFrom<String> for Address {
    type Error = ConvergeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

// ============================================================================
// Status
// ============================================================================

/// Recorded implementation status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Missing,
    Partial,
    Implemented,
    Broken,
    Deprecated,
}

impl Status {
    /// Map an inference confidence to a status (>= 0.7 implemented, >= 0.3 partial)
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.7 {
            Self::Implemented
        } else if confidence >= 0.3 {
            Self::Partial
        } else {
            Self::Missing
        }
    }

    /// Contribution of this status to the convergence percentage
    pub fn convergence_weight(&self) -> f64 {
        match self {
            Self::Implemented | Self::Deprecated => 100.0,
            Self::Partial => 50.0,
            Self::Missing | Self::Broken => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Partial => "partial",
            Self::Implemented => "implemented",
            Self::Broken => "broken",
            Self::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ConvergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "missing" => Ok(Self::Missing),
            "partial" => Ok(Self::Partial),
            "implemented" => Ok(Self::Implemented),
            "broken" => Ok(Self::Broken),
            "deprecated" => Ok(Self::Deprecated),
            other => Err(ConvergeError::Spec {
                message: format!("unknown status '{other}'"),
            }),
        }
    }
}

// ============================================================================
// Symbols
// ============================================================================

/// Whether a tracked symbol was found in the codebase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SymbolPresence {
    #[default]
    Implemented,
    Missing,
}

/// Where a symbol lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolLocation {
    pub file: String,
    #[serde(default)]
    pub line_start: u32,
    #[serde(default)]
    pub line_end: u32,
}

/// Status of one function/class/method tracked inside a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolStatus {
    /// "function", "class", "method", ...
    pub kind: String,
    #[serde(default)]
    pub status: SymbolPresence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SymbolLocation>,
}

impl SymbolStatus {
    pub fn is_present(&self) -> bool {
        self.status == SymbolPresence::Implemented
    }
}

// ============================================================================
// Resource
// ============================================================================

/// A tracked unit of implementation as recorded in state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub address: Address,

    #[serde(default)]
    pub status: Status,

    /// Files that implement this resource, in declaration order
    #[serde(default)]
    pub files: Vec<String>,

    #[serde(default)]
    pub symbols: BTreeMap<String, SymbolStatus>,

    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub depends_on: BTreeSet<Address>,

    /// Who (agent or operator) last converged this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            status: Status::Missing,
            files: Vec::new(),
            symbols: BTreeMap::new(),
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            agent: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Read a string attribute (e.g. `partial_reason`)
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }

    /// Names of tracked symbols that are present
    pub fn present_symbols(&self) -> BTreeSet<&str> {
        self.symbols
            .iter()
            .filter(|(_, s)| s.is_present())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.status)
    }
}

// ============================================================================
// Mutation
// ============================================================================

/// A single change the State Committer can apply
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    MarkCreated {
        address: Address,
        files: Vec<String>,
        symbols: BTreeMap<String, SymbolStatus>,
        depends_on: BTreeSet<Address>,
        agent: Option<String>,
    },
    MarkPartial {
        address: Address,
        reason: String,
    },
    MarkBroken {
        address: Address,
        reason: String,
    },
    Remove {
        address: Address,
    },
}

impl Mutation {
    /// Shorthand for marking a resource implemented with evidence files
    pub fn created(address: Address, files: Vec<String>) -> Self {
        Self::MarkCreated {
            address,
            files,
            symbols: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            agent: None,
        }
    }

    pub fn address(&self) -> &Address {
        match self {
            Self::MarkCreated { address, .. }
            | Self::MarkPartial { address, .. }
            | Self::MarkBroken { address, .. }
            | Self::Remove { address } => address,
        }
    }

    /// Verb used for lock attribution and log lines
    pub fn operation(&self) -> &'static str {
        match self {
            Self::MarkCreated { .. } => "mark_created",
            Self::MarkPartial { .. } => "mark_partial",
            Self::MarkBroken { .. } => "mark_broken",
            Self::Remove { .. } => "remove",
        }
    }
}

// ============================================================================
// State
// ============================================================================

/// The machine-owned record of what exists in the codebase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub version: String,

    /// Incremented by exactly one per committed mutation
    pub serial: u64,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default, with = "resource_seq")]
    resources: BTreeMap<Address, Resource>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            serial: 0,
            last_updated: None,
            resources: BTreeMap::new(),
        }
    }
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<&Resource> {
        self.resources.get(address)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.resources.contains_key(address)
    }

    pub fn status_of(&self, address: &Address) -> Option<Status> {
        self.get(address).map(|r| r.status)
    }

    /// Resources in address order
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Resources in address order, optionally restricted to one kind
    pub fn list(&self, kind: Option<&str>) -> Vec<&Resource> {
        self.resources
            .values()
            .filter(|r| kind.is_none_or(|k| r.address.kind() == k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Insert or replace a resource verbatim (used when loading fixtures)
    pub fn insert(&mut self, resource: Resource) {
        self.resources.insert(resource.address.clone(), resource);
    }

    /// Apply a mutation to the resource table.
    ///
    /// Serial and `last_updated` are owned by the committer and left alone.
    pub fn apply(&mut self, mutation: &Mutation, now: DateTime<Utc>) -> Result<()> {
        match mutation {
            Mutation::MarkCreated {
                address,
                files,
                symbols,
                depends_on,
                agent,
            } => {
                let resource = self.entry(address, now);
                resource.status = Status::Implemented;
                if !files.is_empty() {
                    resource.files = files.clone();
                }
                resource.symbols.extend(symbols.clone());
                if !depends_on.is_empty() {
                    resource.depends_on = depends_on.clone();
                }
                if agent.is_some() {
                    resource.agent = agent.clone();
                }
                resource.attributes.remove("partial_reason");
                resource.attributes.remove("broken_reason");
                resource.updated_at = Some(now);
            }
            Mutation::MarkPartial { address, reason } => {
                let resource = self.entry(address, now);
                resource.status = Status::Partial;
                if !reason.is_empty() {
                    resource
                        .attributes
                        .insert("partial_reason".to_string(), reason.clone().into());
                }
                resource.updated_at = Some(now);
            }
            Mutation::MarkBroken { address, reason } => {
                let resource = self.entry(address, now);
                resource.status = Status::Broken;
                if !reason.is_empty() {
                    resource
                        .attributes
                        .insert("broken_reason".to_string(), reason.clone().into());
                }
                resource.updated_at = Some(now);
            }
            Mutation::Remove { address } => {
                if self.resources.remove(address).is_none() {
                    return Err(ConvergeError::UnknownResource {
                        address: address.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn entry(&mut self, address: &Address, now: DateTime<Utc>) -> &mut Resource {
        self.resources.entry(address.clone()).or_insert_with(|| {
            let mut resource = Resource::new(address.clone());
            resource.created_at = Some(now);
            resource
        })
    }
}

/// Resources are stored as a sequence on disk and keyed by address in memory
mod resource_seq {
    use super::{Address, Resource};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        resources: &BTreeMap<Address, Resource>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(resources.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Address, Resource>, D::Error> {
        let list = Vec::<Resource>::deserialize(deserializer)?;
        let mut resources = BTreeMap::new();
        for resource in list {
            let address = resource.address.clone();
            if resources.insert(address.clone(), resource).is_some() {
                return Err(D::Error::custom(format!(
                    "duplicate resource address in state: {address}"
                )));
            }
        }
        Ok(resources)
    }
}
