//! Execution strategies for plan actions.
//!
//! An [`Executor`] turns one create/update action into an [`ExecOutcome`].
//! The scheduler owns verification, commits and cascading; executors only
//! talk to their collaborator (an operator, agents, or a task market).

pub mod auto;
pub mod hybrid;
pub mod interactive;
pub mod market;
pub mod prompt;

pub use auto::AutoExecutor;
pub use hybrid::HybridExecutor;
pub use interactive::InteractiveExecutor;
pub use market::MarketExecutor;

use crate::context::CancelToken;
use crate::error::{AgentAttempt, ConvergeError, ExecutorError};
use crate::model::{Address, Status};
use crate::planner::PlanAction;
use crate::spec::ResourceSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What an executor reports back for one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Work is done; subject to verification before it is committed
    Implemented {
        files: Vec<String>,
        agent: Option<String>,
        attempts: Vec<AgentAttempt>,
    },
    /// Some of the work is done; committed as partial
    Partial { reason: String },
    /// Nothing was done on purpose
    Declined { reason: String },
    /// Handed off to someone else
    Escalated { reason: String },
    /// Dry-run description of what would happen
    Preview { summary: String },
}

/// Recorded status of a dependency when an action was dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyInfo {
    /// `None` when the dependency is not in state
    pub status: Option<Status>,
    pub files: Vec<String>,
}

/// Everything an executor may look at, passed explicitly
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub resource: ResourceSpec,
    /// Status of the resource in state when planned
    pub current_status: Option<Status>,
    pub dependencies: BTreeMap<Address, DependencyInfo>,
    pub root: PathBuf,
    pub cancel: CancelToken,
}

impl ExecutionContext {
    pub fn new(resource: ResourceSpec, root: impl Into<PathBuf>) -> Self {
        Self {
            resource,
            current_status: None,
            dependencies: BTreeMap::new(),
            root: root.into(),
            cancel: CancelToken::new(),
        }
    }

    /// Declared files plus any `files` list in the attributes, deduplicated
    pub fn suggested_files(&self) -> Vec<String> {
        let from_attributes = self
            .resource
            .attributes
            .get("files")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_string));

        let mut files: Vec<String> = Vec::new();
        for file in self.resource.files.iter().cloned().chain(from_attributes) {
            if !files.contains(&file) {
                files.push(file);
            }
        }
        files
    }
}

/// Strategy that converges a single action
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(
        &self,
        action: &PlanAction,
        context: &ExecutionContext,
    ) -> Result<ExecOutcome, ExecutorError>;
}

/// How actions are executed during `apply`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Interactive,
    Auto,
    Hybrid,
    Market,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Auto => "auto",
            Self::Hybrid => "hybrid",
            Self::Market => "market",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = ConvergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interactive" => Ok(Self::Interactive),
            "auto" => Ok(Self::Auto),
            "hybrid" => Ok(Self::Hybrid),
            "market" => Ok(Self::Market),
            other => Err(ConvergeError::Spec {
                message: format!("unknown mode '{other}' (interactive, auto, hybrid, market)"),
            }),
        }
    }
}

// ============================================================================
// Operator
// ============================================================================

/// A human decision about one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Implement { files: Vec<String> },
    Partial { reason: String },
    Skip,
    Escalate,
    /// Stop the whole run after in-flight work
    Quit,
}

/// A human verdict on agent output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Review {
    Accept,
    Reject { reason: String },
    /// Accept, but with a corrected file list
    Edit { files: Vec<String> },
}

/// The person at the keyboard
pub trait Operator: Send + Sync {
    fn decide(&self, action: &PlanAction, prompt: &str) -> anyhow::Result<Decision>;

    fn review(&self, action: &PlanAction, report: &AgentReport) -> anyhow::Result<Review>;
}

// ============================================================================
// Agents
// ============================================================================

/// One request to a coding agent
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub agent: String,
    pub address: Address,
    pub prompt: String,
    pub root: PathBuf,
    /// Files the resource declares; agents claim touched files within these
    pub scope: Vec<String>,
    pub timeout: Duration,
}

/// What an agent says it did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReport {
    pub agent: String,
    pub files: Vec<String>,
    pub output: String,
}

/// Runs a named agent
pub trait AgentDispatcher: Send + Sync {
    fn invoke(&self, request: &AgentRequest) -> anyhow::Result<AgentReport>;
}

// ============================================================================
// Market
// ============================================================================

/// A bounty posted for one action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketTask {
    pub title: String,
    pub description: String,
    pub address: Address,
    pub bounty: f64,
    pub files: Vec<String>,
}

/// Remote state of a posted task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketStatus {
    Pending,
    InProgress { worker: Option<String> },
    Completed { files: Vec<String>, worker: Option<String> },
    Failed { reason: String },
    Cancelled,
}

impl MarketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

/// Client of a task market
pub trait MarketClient: Send + Sync {
    /// Post a task and return its id
    fn post(&self, task: &MarketTask) -> anyhow::Result<String>;

    fn poll(&self, task_id: &str) -> anyhow::Result<MarketStatus>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggested_files_merge_attributes() {
        let mut resource = ResourceSpec::new().with_file("src/a.rs");
        resource.attributes.insert(
            "files".into(),
            serde_json::json!(["src/a.rs", "src/b.rs", 7]),
        );
        let context = ExecutionContext::new(resource, ".");
        assert_eq!(
            context.suggested_files(),
            vec!["src/a.rs".to_string(), "src/b.rs".to_string()]
        );
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("hybrid".parse::<ExecutionMode>().unwrap(), ExecutionMode::Hybrid);
        assert!("manual".parse::<ExecutionMode>().is_err());
        assert_eq!(ExecutionMode::default().to_string(), "interactive");
    }
}
