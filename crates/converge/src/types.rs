//! Core types for apply runs

use crate::error::AgentAttempt;
use crate::verify::VerifyLevel;
use serde::Serialize;
use std::fmt;

/// Lifecycle of one action inside an apply run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Result of resolving one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionResult {
    /// Implemented, verified and committed
    Implemented {
        files: Vec<String>,
        agent: Option<String>,
        attempts: Vec<AgentAttempt>,
    },
    /// Dry-run preview; nothing verified or committed
    Preview { summary: String },
    /// Confirmed delete, removed from state
    Removed,
    /// Committed as partial; dependents do not proceed
    Partial { reason: String },
    Skipped { reason: String },
    Failed { error: String },
}

impl ActionResult {
    pub fn state(&self) -> ActionState {
        match self {
            Self::Implemented { .. } | Self::Preview { .. } | Self::Removed => {
                ActionState::Succeeded
            }
            Self::Partial { .. } | Self::Skipped { .. } => ActionState::Skipped,
            Self::Failed { .. } => ActionState::Failed,
        }
    }

    /// Check if the result represents success (dependents may proceed)
    pub fn is_success(&self) -> bool {
        self.state() == ActionState::Succeeded
    }

    /// Check if the result changed stored state
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Implemented { .. } | Self::Removed | Self::Partial { .. }
        )
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Implemented { files, .. } if files.is_empty() => f.write_str("implemented"),
            Self::Implemented { files, .. } => write!(f, "implemented ({})", files.join(", ")),
            Self::Preview { summary } => write!(f, "preview: {summary}"),
            Self::Removed => f.write_str("removed"),
            Self::Partial { reason } => write!(f, "partial: {reason}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Summary of apply results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub implemented: usize,
    pub previewed: usize,
    pub removed: usize,
    pub partial: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ApplySummary {
    /// Number of actions that changed stored state
    pub fn total_changes(&self) -> usize {
        self.implemented + self.removed + self.partial
    }

    /// Check if the run was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn total(&self) -> usize {
        self.implemented + self.previewed + self.removed + self.partial + self.skipped + self.failed
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ActionResult) {
        match result {
            ActionResult::Implemented { .. } => self.implemented += 1,
            ActionResult::Preview { .. } => self.previewed += 1,
            ActionResult::Removed => self.removed += 1,
            ActionResult::Partial { .. } => self.partial += 1,
            ActionResult::Skipped { .. } => self.skipped += 1,
            ActionResult::Failed { .. } => self.failed += 1,
        }
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} implemented, {} skipped, {} failed",
            self.implemented,
            self.skipped + self.partial,
            self.failed
        )?;
        if self.removed > 0 {
            write!(f, ", {} removed", self.removed)?;
        }
        if self.previewed > 0 {
            write!(f, ", {} previewed", self.previewed)?;
        }
        Ok(())
    }
}

/// Options for apply runs
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Maximum number of actions executing at once
    pub workers: usize,
    /// Evidence required before an implemented outcome is committed
    pub verify: VerifyLevel,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            verify: VerifyLevel::Basic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_states() {
        assert_eq!(ActionResult::Removed.state(), ActionState::Succeeded);
        assert_eq!(
            ActionResult::Partial {
                reason: "x".into()
            }
            .state(),
            ActionState::Skipped
        );
        assert!(
            !ActionResult::Failed {
                error: "boom".into()
            }
            .is_success()
        );
        assert!(ActionState::Skipped.is_terminal());
        assert!(!ActionState::Running.is_terminal());
    }

    #[test]
    fn test_summary_line() {
        let mut summary = ApplySummary::default();
        summary.add_result(&ActionResult::Implemented {
            files: vec![],
            agent: None,
            attempts: vec![],
        });
        summary.add_result(&ActionResult::Skipped {
            reason: "dependency failed".into(),
        });
        summary.add_result(&ActionResult::Partial {
            reason: "tests pending".into(),
        });
        summary.add_result(&ActionResult::Failed {
            error: "boom".into(),
        });
        assert_eq!(summary.to_string(), "1 implemented, 2 skipped, 1 failed");
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.total_changes(), 2);
        assert!(!summary.is_success());
    }
}
