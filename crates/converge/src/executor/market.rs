//! Market execution: post a bounty and wait for a worker to finish it

use super::{ExecOutcome, ExecutionContext, Executor, MarketClient, MarketStatus, MarketTask, prompt};
use crate::error::ExecutorError;
use crate::planner::PlanAction;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default bounty offered per task
pub const DEFAULT_BOUNTY: f64 = 10.0;

/// Posts each action as a task and polls until it completes
pub struct MarketExecutor {
    client: Arc<dyn MarketClient>,
    bounty: f64,
    poll_interval: Duration,
    timeout: Duration,
    dry_run: bool,
}

impl MarketExecutor {
    pub fn new(client: Arc<dyn MarketClient>) -> Self {
        Self {
            client,
            bounty: DEFAULT_BOUNTY,
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(3600),
            dry_run: false,
        }
    }

    pub fn with_bounty(mut self, bounty: f64) -> Self {
        self.bounty = bounty;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Describe tasks instead of posting them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn task(&self, action: &PlanAction, context: &ExecutionContext) -> MarketTask {
        let title = context.resource.attribute_str("description").map_or_else(
            || format!("{} {}", action.kind, action.address),
            |d| format!("{}: {d}", action.address),
        );
        MarketTask {
            title,
            description: prompt::build(action, context),
            address: action.address.clone(),
            bounty: self.bounty,
            files: context.suggested_files(),
        }
    }
}

impl Executor for MarketExecutor {
    fn name(&self) -> &'static str {
        "market"
    }

    fn execute(
        &self,
        action: &PlanAction,
        context: &ExecutionContext,
    ) -> Result<ExecOutcome, ExecutorError> {
        let task = self.task(action, context);

        if self.dry_run {
            return Ok(ExecOutcome::Preview {
                summary: format!("would post '{}' with bounty {:.2}", task.title, task.bounty),
            });
        }

        let task_id = self
            .client
            .post(&task)
            .map_err(|e| ExecutorError::Other(format!("posting task failed: {e:#}")))?;
        log::info!("Posted {} as market task {task_id}", action.address);

        let started = Instant::now();
        loop {
            if context.cancel.is_cancelled() {
                return Ok(ExecOutcome::Escalated {
                    reason: format!("run cancelled; market task {task_id} left open"),
                });
            }

            match self.client.poll(&task_id) {
                Ok(MarketStatus::Completed { files, worker }) => {
                    let agent = worker.map_or_else(|| "market".to_string(), |w| format!("market:{w}"));
                    return Ok(ExecOutcome::Implemented {
                        files,
                        agent: Some(agent),
                        attempts: Vec::new(),
                    });
                }
                Ok(MarketStatus::Failed { reason }) => {
                    return Err(ExecutorError::Market {
                        task_id,
                        outcome: format!("failed: {reason}"),
                    });
                }
                Ok(MarketStatus::Cancelled) => {
                    return Err(ExecutorError::Market {
                        task_id,
                        outcome: "was cancelled".to_string(),
                    });
                }
                Ok(MarketStatus::InProgress { worker: Some(worker) }) => {
                    log::debug!("Market task {task_id} in progress ({worker})");
                }
                Ok(_) => {}
                Err(e) => log::warn!("Polling market task {task_id} failed: {e:#}"),
            }

            if started.elapsed() >= self.timeout {
                return Err(ExecutorError::Timeout {
                    what: format!("market task {task_id}"),
                    seconds: self.timeout.as_secs(),
                });
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}
