//! Error types for the convergence engine.
//!
//! Errors are categorized so callers can tell fatal spec problems apart from
//! recoverable contention (locks, stale writes) and from per-action failures
//! that only affect one subgraph of an apply run.

use crate::graph::GraphError;
use crate::model::{Address, Status};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Categories of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or ambiguous spec (fatal, before planning)
    Spec,
    /// Dangling reference or cycle (fatal, before planning)
    Dependency,
    /// Another holder owns the state lock
    LockConflict,
    /// Serial mismatch on write
    StaleWrite,
    /// Executor claimed success but evidence is insufficient
    Verification,
    /// Agent, market or operator failure
    Executor,
    /// Storage I/O failure
    Backend,
    /// Caller referenced something that is not there
    Usage,
}

impl ErrorCategory {
    /// Whether retrying the same call may succeed without changing inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend)
    }

    /// Whether the caller can recover (wait, reload, force-unlock) and try again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::LockConflict | Self::StaleWrite | Self::Backend)
    }

    /// Whether this error aborts a run before any mutation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Spec | Self::Dependency)
    }

    pub fn advice(&self) -> &'static str {
        match self {
            Self::Spec => "Fix the spec file and run again",
            Self::Dependency => "Declare the missing resources or break the dependency cycle",
            Self::LockConflict => "Wait for the holder to finish, or force-unlock if it crashed",
            Self::StaleWrite => "Reload state and recompute the plan before retrying",
            Self::Verification => "Inspect the declared files and symbols for this resource",
            Self::Executor => "Check the agent or market output for details",
            Self::Backend => "Check storage availability and try again",
            Self::Usage => "Check the resource address",
        }
    }
}

/// One attempt made by an agent in an `auto` chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentAttempt {
    pub agent: String,
    /// `None` when the attempt succeeded
    pub failure: Option<String>,
}

impl fmt::Display for AgentAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            Some(reason) => write!(f, "{}: {}", self.agent, reason),
            None => write!(f, "{}: ok", self.agent),
        }
    }
}

/// Why an executor could not converge an action
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutorError {
    #[error("all {} agents failed: {}", .attempts.len(), format_attempts(.attempts))]
    ChainExhausted { attempts: Vec<AgentAttempt> },

    #[error("rejected by reviewer: {reason}")]
    Rejected { reason: String },

    #[error("market task {task_id} {outcome}")]
    Market { task_id: String, outcome: String },

    #[error("timed out after {seconds}s: {what}")]
    Timeout { what: String, seconds: u64 },

    #[error("operator input failed: {0}")]
    Operator(String),

    #[error("{0}")]
    Other(String),
}

fn format_attempts(attempts: &[AgentAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced by the convergence engine
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error("invalid spec: {message}")]
    Spec { message: String },

    #[error("invalid dependency graph: {}", format_graph_errors(.errors))]
    Dependency { errors: Vec<GraphError> },

    #[error(
        "state is locked by {holder} since {acquired_at} (operation: {operation}, lock ID: {lock_id})"
    )]
    LockConflict {
        lock_id: Uuid,
        holder: String,
        operation: String,
        acquired_at: DateTime<Utc>,
    },

    #[error("stale write: expected stored serial {expected}, found {found}")]
    StaleWrite { expected: u64, found: u64 },

    #[error("verification failed for {address}: {reason}")]
    Verification { address: Address, reason: String },

    #[error("executor failed for {address}: {source}")]
    Executor {
        address: Address,
        #[source]
        source: ExecutorError,
    },

    #[error("backend error: {message}")]
    Backend { message: String },

    #[error("resource not found: {address}")]
    UnknownResource { address: Address },

    #[error("{address} depends on {dependency}, which is {}", .status.map_or("not in state", |s| s.as_str()))]
    DependencyNotConverged {
        address: Address,
        dependency: Address,
        status: Option<Status>,
    },
}

fn format_graph_errors(errors: &[GraphError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConvergeError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Spec { .. } => ErrorCategory::Spec,
            Self::Dependency { .. } => ErrorCategory::Dependency,
            Self::LockConflict { .. } => ErrorCategory::LockConflict,
            Self::StaleWrite { .. } => ErrorCategory::StaleWrite,
            Self::Verification { .. } => ErrorCategory::Verification,
            Self::Executor { .. } | Self::DependencyNotConverged { .. } => {
                ErrorCategory::Executor
            }
            Self::Backend { .. } => ErrorCategory::Backend,
            Self::UnknownResource { .. } => ErrorCategory::Usage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Process exit status for this error (see [`ExitStatus`])
    pub fn exit_status(&self) -> ExitStatus {
        match self.category() {
            ErrorCategory::Spec | ErrorCategory::Dependency => ExitStatus::SpecInvalid,
            ErrorCategory::LockConflict => ExitStatus::LockConflict,
            _ => ExitStatus::ExecutionError,
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConvergeError {
    fn from(err: std::io::Error) -> Self {
        Self::backend(err.to_string())
    }
}

impl From<serde_json::Error> for ConvergeError {
    fn from(err: serde_json::Error) -> Self {
        Self::backend(format!("state document: {err}"))
    }
}

/// Distinguishable process exit statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Nothing pending, or the requested operation succeeded
    Success = 0,
    /// An action or storage operation failed
    ExecutionError = 1,
    /// The plan still has pending work
    PendingChanges = 2,
    /// The spec is malformed or its dependency graph is invalid
    SpecInvalid = 3,
    /// Another process holds the state lock
    LockConflict = 4,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;
