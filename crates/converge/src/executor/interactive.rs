//! Interactive execution: an operator decides each action

use super::{Decision, ExecOutcome, ExecutionContext, Executor, Operator, prompt};
use crate::error::ExecutorError;
use crate::planner::PlanAction;
use std::sync::Arc;

/// Asks an [`Operator`] what happened for each action
pub struct InteractiveExecutor {
    operator: Arc<dyn Operator>,
}

impl InteractiveExecutor {
    pub fn new(operator: Arc<dyn Operator>) -> Self {
        Self { operator }
    }
}

impl Executor for InteractiveExecutor {
    fn name(&self) -> &'static str {
        "interactive"
    }

    fn execute(
        &self,
        action: &PlanAction,
        context: &ExecutionContext,
    ) -> Result<ExecOutcome, ExecutorError> {
        if context.cancel.is_cancelled() {
            return Ok(ExecOutcome::Declined {
                reason: "run cancelled".to_string(),
            });
        }

        let text = prompt::build(action, context);
        let decision = self
            .operator
            .decide(action, &text)
            .map_err(|e| ExecutorError::Operator(format!("{e:#}")))?;

        Ok(match decision {
            Decision::Implement { files } => ExecOutcome::Implemented {
                files,
                agent: Some("operator".to_string()),
                attempts: Vec::new(),
            },
            Decision::Partial { reason } => ExecOutcome::Partial { reason },
            Decision::Skip => ExecOutcome::Declined {
                reason: "skipped by operator".to_string(),
            },
            Decision::Escalate => ExecOutcome::Escalated {
                reason: "escalated by operator".to_string(),
            },
            Decision::Quit => {
                log::info!("Operator quit; no further actions will be dispatched");
                context.cancel.cancel();
                ExecOutcome::Declined {
                    reason: "operator quit".to_string(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{ScriptedOperator, action};
    use crate::spec::ResourceSpec;

    fn run(decisions: Vec<Decision>) -> (Result<ExecOutcome, ExecutorError>, ExecutionContext) {
        let executor = InteractiveExecutor::new(Arc::new(ScriptedOperator::new(decisions)));
        let context = ExecutionContext::new(ResourceSpec::new(), ".");
        (executor.execute(&action("feature.login"), &context), context)
    }

    #[test]
    fn test_implement_records_files() {
        let (outcome, _) = run(vec![Decision::Implement {
            files: vec!["src/login.rs".into()],
        }]);
        assert_eq!(
            outcome.unwrap(),
            ExecOutcome::Implemented {
                files: vec!["src/login.rs".into()],
                agent: Some("operator".into()),
                attempts: vec![],
            }
        );
    }

    #[test]
    fn test_partial_and_skip() {
        let (outcome, _) = run(vec![Decision::Partial {
            reason: "tests pending".into(),
        }]);
        assert!(matches!(outcome.unwrap(), ExecOutcome::Partial { .. }));

        let (outcome, _) = run(vec![Decision::Skip]);
        assert!(matches!(outcome.unwrap(), ExecOutcome::Declined { .. }));

        let (outcome, _) = run(vec![Decision::Escalate]);
        assert!(matches!(outcome.unwrap(), ExecOutcome::Escalated { .. }));
    }

    #[test]
    fn test_quit_cancels_the_run() {
        let (outcome, context) = run(vec![Decision::Quit]);
        assert!(matches!(outcome.unwrap(), ExecOutcome::Declined { .. }));
        assert!(context.cancel.is_cancelled());
    }

    #[test]
    fn test_operator_failure_is_executor_error() {
        let (outcome, _) = run(vec![]);
        assert!(matches!(outcome, Err(ExecutorError::Operator(_))));
    }
}
