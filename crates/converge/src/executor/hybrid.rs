//! Hybrid execution: agents do the work, an operator reviews it

use super::{AutoExecutor, ExecOutcome, ExecutionContext, Executor, Operator, Review};
use crate::error::ExecutorError;
use crate::planner::PlanAction;
use std::sync::Arc;

/// Runs the agent chain, then asks an operator to accept, reject or edit the result
pub struct HybridExecutor {
    auto: AutoExecutor,
    operator: Arc<dyn Operator>,
}

impl HybridExecutor {
    pub fn new(auto: AutoExecutor, operator: Arc<dyn Operator>) -> Self {
        Self { auto, operator }
    }
}

impl Executor for HybridExecutor {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn execute(
        &self,
        action: &PlanAction,
        context: &ExecutionContext,
    ) -> Result<ExecOutcome, ExecutorError> {
        let (report, attempts) = self.auto.run_chain(action, context)?;

        let review = self
            .operator
            .review(action, &report)
            .map_err(|e| ExecutorError::Operator(format!("{e:#}")))?;

        match review {
            Review::Accept => Ok(ExecOutcome::Implemented {
                files: report.files,
                agent: Some(report.agent),
                attempts,
            }),
            Review::Edit { files } => {
                log::debug!("Operator edited file list for {}", action.address);
                Ok(ExecOutcome::Implemented {
                    files,
                    agent: Some(report.agent),
                    attempts,
                })
            }
            Review::Reject { reason } => Err(ExecutorError::Rejected { reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{AgentScript, ScriptedAgents, ScriptedOperator, action};
    use crate::spec::ResourceSpec;
    use std::time::Duration;

    fn hybrid(review: Review) -> HybridExecutor {
        let agents = ScriptedAgents(vec![(
            "claude",
            AgentScript::Succeed {
                files: vec!["src/login.rs".into()],
                delay: Duration::ZERO,
            },
        )]);
        let auto = AutoExecutor::new(
            Arc::new(agents),
            vec!["claude".into()],
            Duration::from_secs(5),
        );
        HybridExecutor::new(auto, Arc::new(ScriptedOperator::reviewing(review)))
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(ResourceSpec::new(), ".")
    }

    #[test]
    fn test_accept_keeps_agent_files() {
        let outcome = hybrid(Review::Accept)
            .execute(&action("feature.login"), &context())
            .unwrap();
        assert!(matches!(
            outcome,
            ExecOutcome::Implemented { ref files, ref agent, .. }
                if files == &vec!["src/login.rs".to_string()] && agent.as_deref() == Some("claude")
        ));
    }

    #[test]
    fn test_edit_replaces_files() {
        let outcome = hybrid(Review::Edit {
            files: vec!["src/auth/login.rs".into()],
        })
        .execute(&action("feature.login"), &context())
        .unwrap();
        assert!(matches!(
            outcome,
            ExecOutcome::Implemented { files, .. } if files == vec!["src/auth/login.rs".to_string()]
        ));
    }

    #[test]
    fn test_reject_is_an_error() {
        let err = hybrid(Review::Reject {
            reason: "wrong module".into(),
        })
        .execute(&action("feature.login"), &context())
        .unwrap_err();
        assert_eq!(
            err,
            ExecutorError::Rejected {
                reason: "wrong module".into()
            }
        );
    }
}
