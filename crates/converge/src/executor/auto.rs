//! Automated execution: an ordered chain of agents with per-attempt timeouts

use super::{
    AgentDispatcher, AgentReport, AgentRequest, ExecOutcome, ExecutionContext, Executor, prompt,
};
use crate::error::{AgentAttempt, ExecutorError};
use crate::planner::PlanAction;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

/// Tries each agent in order until one reports success
pub struct AutoExecutor {
    dispatcher: Arc<dyn AgentDispatcher>,
    agents: Vec<String>,
    timeout: Duration,
}

impl AutoExecutor {
    pub fn new(dispatcher: Arc<dyn AgentDispatcher>, agents: Vec<String>, timeout: Duration) -> Self {
        Self {
            dispatcher,
            agents,
            timeout,
        }
    }

    /// Run the chain and return the first successful report with every attempt made
    pub(crate) fn run_chain(
        &self,
        action: &PlanAction,
        context: &ExecutionContext,
    ) -> Result<(AgentReport, Vec<AgentAttempt>), ExecutorError> {
        if self.agents.is_empty() {
            return Err(ExecutorError::Other("no agents configured".to_string()));
        }

        let text = prompt::build(action, context);
        let mut attempts = Vec::with_capacity(self.agents.len());

        for agent in &self.agents {
            if context.cancel.is_cancelled() {
                attempts.push(AgentAttempt {
                    agent: agent.clone(),
                    failure: Some("run cancelled".to_string()),
                });
                break;
            }

            let request = AgentRequest {
                agent: agent.clone(),
                address: action.address.clone(),
                prompt: text.clone(),
                root: context.root.clone(),
                scope: context.resource.files.clone(),
                timeout: self.timeout,
            };

            log::debug!("Dispatching {} to agent {}", action.address, agent);
            match invoke_with_timeout(&self.dispatcher, request, self.timeout) {
                Ok(mut report) => {
                    attempts.push(AgentAttempt {
                        agent: agent.clone(),
                        failure: None,
                    });
                    if report.files.is_empty() {
                        report.files = context.suggested_files();
                    }
                    return Ok((report, attempts));
                }
                Err(reason) => {
                    log::warn!("Agent {agent} failed on {}: {reason}", action.address);
                    attempts.push(AgentAttempt {
                        agent: agent.clone(),
                        failure: Some(reason),
                    });
                }
            }
        }

        Err(ExecutorError::ChainExhausted { attempts })
    }
}

impl Executor for AutoExecutor {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn execute(
        &self,
        action: &PlanAction,
        context: &ExecutionContext,
    ) -> Result<ExecOutcome, ExecutorError> {
        let (report, attempts) = self.run_chain(action, context)?;
        Ok(ExecOutcome::Implemented {
            files: report.files,
            agent: Some(report.agent),
            attempts,
        })
    }
}

/// Run the agent on a helper thread and stop waiting after `timeout`.
///
/// A timed-out helper is abandoned; dispatchers bound their own work with
/// the request timeout.
fn invoke_with_timeout(
    dispatcher: &Arc<dyn AgentDispatcher>,
    request: AgentRequest,
    timeout: Duration,
) -> Result<AgentReport, String> {
    let (tx, rx) = mpsc::channel();
    let dispatcher = Arc::clone(dispatcher);

    std::thread::Builder::new()
        .name(format!("agent-{}", request.agent))
        .spawn(move || {
            let result = dispatcher.invoke(&request).map(|mut report| {
                if report.agent.is_empty() {
                    report.agent = request.agent.clone();
                }
                report
            });
            // receiver is gone after a timeout
            let _ = tx.send(result);
        })
        .map_err(|e| format!("cannot start agent thread: {e}"))?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(report)) => Ok(report),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(RecvTimeoutError::Timeout) => {
            Err(format!("timed out after {:.1}s", timeout.as_secs_f64()))
        }
        Err(RecvTimeoutError::Disconnected) => Err("agent thread ended without a result".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{AgentScript, ScriptedAgents, action};
    use crate::spec::ResourceSpec;

    fn executor(agents: Vec<(&'static str, AgentScript)>) -> AutoExecutor {
        let names = agents.iter().map(|(n, _)| (*n).to_string()).collect();
        AutoExecutor::new(
            Arc::new(ScriptedAgents(agents)),
            names,
            Duration::from_millis(100),
        )
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new(ResourceSpec::new().with_file("src/login.rs"), ".")
    }

    #[test]
    fn test_primary_timeout_falls_back() {
        let auto = executor(vec![
            ("primary", AgentScript::Hang(Duration::from_secs(2))),
            (
                "fallback",
                AgentScript::Succeed {
                    files: vec!["src/login.rs".into()],
                    delay: Duration::ZERO,
                },
            ),
        ]);
        let outcome = auto.execute(&action("feature.login"), &context()).unwrap();
        match outcome {
            ExecOutcome::Implemented {
                files,
                agent,
                attempts,
            } => {
                assert_eq!(files, vec!["src/login.rs".to_string()]);
                assert_eq!(agent.as_deref(), Some("fallback"));
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].agent, "primary");
                assert!(attempts[0].failure.as_deref().unwrap().contains("timed out"));
                assert_eq!(attempts[1].agent, "fallback");
                assert!(attempts[1].failure.is_none());
            }
            other => panic!("expected implemented, got {other:?}"),
        }
    }

    #[test]
    fn test_exhausted_chain_lists_every_attempt() {
        let auto = executor(vec![
            ("primary", AgentScript::Fail("exit 1".into())),
            ("fallback", AgentScript::Fail("exit 2".into())),
        ]);
        let err = auto.execute(&action("feature.login"), &context()).unwrap_err();
        match err {
            ExecutorError::ChainExhausted { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[1].failure.as_deref(), Some("exit 2"));
            }
            other => panic!("expected exhausted chain, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_report_falls_back_to_suggested_files() {
        let auto = executor(vec![(
            "only",
            AgentScript::Succeed {
                files: vec![],
                delay: Duration::ZERO,
            },
        )]);
        let outcome = auto.execute(&action("feature.login"), &context()).unwrap();
        assert!(matches!(
            outcome,
            ExecOutcome::Implemented { files, .. } if files == vec!["src/login.rs".to_string()]
        ));
    }

    #[test]
    fn test_no_agents_is_an_error() {
        let auto = executor(vec![]);
        assert!(matches!(
            auto.execute(&action("feature.login"), &context()),
            Err(ExecutorError::Other(_))
        ));
    }
}
