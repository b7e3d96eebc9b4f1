//! Apply scheduler - runs a plan in dependency order on a bounded worker pool
//!
//! The calling thread coordinates: it dispatches ready actions to a rayon
//! pool, receives outcomes over a channel, verifies and commits them, and
//! propagates skips to dependents. Commits only ever happen here.

use crate::commit::StateCommitter;
use crate::context::{CancelToken, ConfirmCallback, ProgressCallback};
use crate::error::{ConvergeError, ExecutorError, Result};
use crate::executor::{DependencyInfo, ExecOutcome, ExecutionContext, Executor};
use crate::graph::DependencyGraph;
use crate::lock::LockGuard;
use crate::model::{Address, Mutation, State, Status};
use crate::planner::{ActionKind, Plan, PlanAction};
use crate::spec::Spec;
use crate::types::{ActionResult, ActionState, ApplyOptions, ApplySummary};
use crate::verify::Verifier;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// How one action ended, with timings taken on the coordinator
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub address: Address,
    pub kind: ActionKind,
    pub result: ActionResult,
    /// When the action was handed to a worker; `None` if it never ran
    pub started: Option<Instant>,
    pub finished: Option<Instant>,
}

impl ActionReport {
    pub fn elapsed(&self) -> Option<Duration> {
        Some(self.finished?.duration_since(self.started?))
    }
}

/// Outcome of an apply run
#[derive(Debug, Clone)]
pub struct ApplyReport {
    /// One entry per actionable plan step, in plan order
    pub actions: Vec<ActionReport>,
    pub summary: ApplySummary,
    pub cancelled: bool,
    pub duration: Duration,
}

impl ApplyReport {
    pub fn get(&self, address: &Address) -> Option<&ActionReport> {
        self.actions.iter().find(|a| &a.address == address)
    }

    pub fn result_of(&self, address: &Address) -> Option<&ActionResult> {
        self.get(address).map(|a| &a.result)
    }

    pub fn is_success(&self) -> bool {
        self.summary.is_success() && !self.cancelled
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.1}s)", self.summary, self.duration.as_secs_f64())?;
        if self.cancelled {
            f.write_str(", cancelled")?;
        }
        Ok(())
    }
}

/// Runs plans against one spec with one executor
pub struct Scheduler<'a> {
    spec: &'a Spec,
    executor: Arc<dyn Executor>,
    verifier: Verifier,
    workers: usize,
    root: PathBuf,
    cancel: CancelToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        spec: &'a Spec,
        executor: Arc<dyn Executor>,
        options: &ApplyOptions,
        root: impl Into<PathBuf>,
    ) -> Self {
        let root = root.into();
        Self {
            spec,
            executor,
            verifier: Verifier::new(options.verify, root.clone()),
            workers: options.workers.max(1),
            root,
            cancel: CancelToken::new(),
        }
    }

    /// Replace the default verifier (e.g. to add a baseline or inference)
    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Share a cancel token with the caller (signal handlers, operators)
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Apply only `address`.
    ///
    /// Every direct dependency must already be implemented in state; otherwise
    /// nothing is dispatched.
    pub fn apply_resource<P, C>(
        &self,
        plan: &Plan,
        address: &Address,
        committer: &mut StateCommitter,
        guard: &LockGuard,
        progress: &mut P,
        confirm: &mut C,
    ) -> Result<ApplyReport>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let selected = plan.select(address)?;
        for action in &selected.actions {
            for dependency in &action.dependencies {
                let status = committer.state().status_of(dependency);
                if status != Some(Status::Implemented) {
                    return Err(ConvergeError::DependencyNotConverged {
                        address: action.address.clone(),
                        dependency: dependency.clone(),
                        status,
                    });
                }
            }
        }
        self.apply(&selected, committer, guard, progress, confirm)
    }

    /// Apply every actionable step of `plan`.
    ///
    /// Creates and updates run on the pool as their dependencies succeed.
    /// Deletes run last on this thread and only when `confirm` agrees.
    pub fn apply<P, C>(
        &self,
        plan: &Plan,
        committer: &mut StateCommitter,
        guard: &LockGuard,
        progress: &mut P,
        confirm: &mut C,
    ) -> Result<ApplyReport>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let started = Instant::now();
        let (work, deletes): (Vec<&PlanAction>, Vec<&PlanAction>) = plan
            .actionable()
            .partition(|a| a.kind != ActionKind::Delete);

        progress.on_batch_start(work.len() + deletes.len());
        log::info!(
            "Applying {} actions with {} ({} workers, {} verification)",
            work.len() + deletes.len(),
            self.executor.name(),
            self.workers,
            self.verifier.level()
        );

        let mut run = Run::new(&work);
        self.run_dag(&mut run, committer, guard, progress)?;

        let mut reports = run.into_reports();
        for action in deletes {
            let result = self.resolve_delete(action, committer, guard, confirm)?;
            progress.on_resource_complete(&action.address, &result);
            reports.push(ActionReport {
                address: action.address.clone(),
                kind: action.kind,
                result,
                started: None,
                finished: None,
            });
        }

        progress.on_batch_complete();

        let mut summary = ApplySummary::default();
        for report in &reports {
            summary.add_result(&report.result);
        }
        let report = ApplyReport {
            actions: reports,
            summary,
            cancelled: self.cancel.is_cancelled(),
            duration: started.elapsed(),
        };
        log::info!("Apply finished: {report}");
        Ok(report)
    }

    fn run_dag<P: ProgressCallback>(
        &self,
        run: &mut Run<'_>,
        committer: &mut StateCommitter,
        guard: &LockGuard,
        progress: &mut P,
    ) -> Result<()> {
        if run.is_empty() {
            return Ok(());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("apply-worker-{i}"))
            .build()
            .map_err(|e| ConvergeError::backend(format!("failed to create worker pool: {e}")))?;

        let (tx, rx) = mpsc::channel::<(usize, std::result::Result<ExecOutcome, ExecutorError>)>();
        let mut in_flight = 0usize;
        let mut failure: Option<ConvergeError> = None;

        loop {
            while failure.is_none() && !self.cancel.is_cancelled() && in_flight < self.workers {
                let Some(index) = run.next_ready() else {
                    break;
                };
                let action = run.actions[index].clone();
                let context = self.context(&action, committer.state());
                run.mark_running(index);
                progress.on_resource_start(&action);

                let executor = Arc::clone(&self.executor);
                let tx = tx.clone();
                pool.spawn(move || {
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        executor.execute(&action, &context)
                    }))
                    .unwrap_or_else(|_| Err(ExecutorError::Other("executor panicked".to_string())));
                    // receiver outlives every worker
                    let _ = tx.send((index, outcome));
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }
            let Ok((index, outcome)) = rx.recv() else {
                break;
            };
            in_flight -= 1;

            if let Some(err) = &failure {
                log::warn!(
                    "Discarding outcome for {} after commit failure",
                    run.actions[index].address
                );
                let result = ActionResult::Failed {
                    error: format!("not committed: {err}"),
                };
                run.finish(index, result, progress);
                continue;
            }

            let action = run.actions[index];
            match self.resolve(action, outcome, committer, guard) {
                Ok(result) => run.finish(index, result, progress),
                Err(err) => {
                    log::error!("Commit failed for {}: {err}", action.address);
                    let result = ActionResult::Failed {
                        error: err.to_string(),
                    };
                    run.finish(index, result, progress);
                    failure = Some(err);
                }
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            run.skip_remaining("run cancelled", progress);
        }
        Ok(())
    }

    fn context(&self, action: &PlanAction, state: &State) -> ExecutionContext {
        let resource = self.spec.get(&action.address).cloned().unwrap_or_default();
        let mut context = ExecutionContext::new(resource, self.root.clone());
        context.current_status = state.status_of(&action.address);
        context.cancel = self.cancel.clone();
        for dependency in &action.dependencies {
            context.dependencies.insert(
                dependency.clone(),
                DependencyInfo {
                    status: state.status_of(dependency),
                    files: state
                        .get(dependency)
                        .map(|r| r.files.clone())
                        .unwrap_or_default(),
                },
            );
        }
        context
    }

    /// Turn an executor outcome into a result, committing where needed.
    ///
    /// Only commit errors are returned as `Err`.
    fn resolve(
        &self,
        action: &PlanAction,
        outcome: std::result::Result<ExecOutcome, ExecutorError>,
        committer: &mut StateCommitter,
        guard: &LockGuard,
    ) -> Result<ActionResult> {
        let address = &action.address;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(source) => {
                let err = ConvergeError::Executor {
                    address: address.clone(),
                    source,
                };
                log::warn!("{err}");
                return Ok(ActionResult::Failed {
                    error: err.to_string(),
                });
            }
        };

        match outcome {
            ExecOutcome::Implemented {
                files,
                agent,
                attempts,
            } => {
                let resource = self.spec.get(address).cloned().unwrap_or_default();
                let verification = self.verifier.verify(address, &resource, &files);
                if !verification.passed {
                    let err = ConvergeError::Verification {
                        address: address.clone(),
                        reason: verification.reason(),
                    };
                    log::warn!("{err}");
                    return Ok(ActionResult::Failed {
                        error: err.to_string(),
                    });
                }

                let files = verification.files_checked;
                committer.commit(
                    guard,
                    &Mutation::MarkCreated {
                        address: address.clone(),
                        files: files.clone(),
                        symbols: verification.symbols,
                        depends_on: resource.depends_on,
                        agent: agent.clone(),
                    },
                )?;
                Ok(ActionResult::Implemented {
                    files,
                    agent,
                    attempts,
                })
            }
            ExecOutcome::Partial { reason } => {
                committer.commit(
                    guard,
                    &Mutation::MarkPartial {
                        address: address.clone(),
                        reason: reason.clone(),
                    },
                )?;
                Ok(ActionResult::Partial { reason })
            }
            ExecOutcome::Declined { reason } => Ok(ActionResult::Skipped { reason }),
            ExecOutcome::Escalated { reason } => Ok(ActionResult::Skipped {
                reason: format!("escalated: {reason}"),
            }),
            ExecOutcome::Preview { summary } => Ok(ActionResult::Preview { summary }),
        }
    }

    fn resolve_delete<C: ConfirmCallback>(
        &self,
        action: &PlanAction,
        committer: &mut StateCommitter,
        guard: &LockGuard,
        confirm: &mut C,
    ) -> Result<ActionResult> {
        if self.cancel.is_cancelled() {
            return Ok(ActionResult::Skipped {
                reason: "run cancelled".to_string(),
            });
        }

        let prompt = format!("Remove {} from state ({})?", action.address, action.reason);
        match confirm.confirm(&prompt) {
            Ok(true) => {
                committer.commit(
                    guard,
                    &Mutation::Remove {
                        address: action.address.clone(),
                    },
                )?;
                Ok(ActionResult::Removed)
            }
            Ok(false) => Ok(ActionResult::Skipped {
                reason: "advisory delete, not confirmed".to_string(),
            }),
            Err(e) => {
                log::warn!("Confirmation for {} failed: {e:#}", action.address);
                Ok(ActionResult::Skipped {
                    reason: format!("confirmation failed: {e:#}"),
                })
            }
        }
    }
}

/// Per-run bookkeeping, indexed like the dependency graph
struct Run<'p> {
    graph: DependencyGraph,
    actions: Vec<&'p PlanAction>,
    /// Plan position of each node, used to dispatch in plan order
    position: Vec<usize>,
    states: Vec<ActionState>,
    waiting: Vec<usize>,
    ready: BTreeSet<(usize, usize)>,
    results: Vec<Option<ActionResult>>,
    started: Vec<Option<Instant>>,
    finished: Vec<Option<Instant>>,
}

impl<'p> Run<'p> {
    fn new(work: &[&'p PlanAction]) -> Self {
        // dependencies outside the run are dangling here and ignored
        let graph = DependencyGraph::build(work.iter().map(|a| (&a.address, &a.dependencies)));
        let n = graph.len();

        let mut slots: Vec<Option<(usize, &'p PlanAction)>> = vec![None; n];
        for (pos, action) in work.iter().enumerate() {
            if let Some(i) = graph.index_of(&action.address) {
                slots[i] = Some((pos, *action));
            }
        }
        let (position, actions): (Vec<usize>, Vec<&'p PlanAction>) =
            slots.into_iter().flatten().unzip();

        let waiting: Vec<usize> = (0..n).map(|i| graph.dependencies_of(i).len()).collect();
        let mut states = vec![ActionState::Pending; n];
        let mut ready = BTreeSet::new();
        for i in (0..n).filter(|&i| waiting[i] == 0) {
            states[i] = ActionState::Ready;
            ready.insert((position[i], i));
        }

        Self {
            graph,
            actions,
            position,
            states,
            waiting,
            ready,
            results: vec![None; n],
            started: vec![None; n],
            finished: vec![None; n],
        }
    }

    fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop_first().map(|(_, i)| i)
    }

    fn mark_running(&mut self, index: usize) {
        self.states[index] = ActionState::Running;
        self.started[index] = Some(Instant::now());
    }

    /// Record a terminal result and update dependents
    fn finish<P: ProgressCallback>(&mut self, index: usize, result: ActionResult, progress: &mut P) {
        let state = result.state();
        self.states[index] = state;
        self.finished[index] = Some(Instant::now());
        progress.on_resource_complete(&self.actions[index].address, &result);
        self.results[index] = Some(result);

        if state == ActionState::Succeeded {
            for &dependent in self.graph.dependents_of(index) {
                self.waiting[dependent] -= 1;
                if self.waiting[dependent] == 0 && self.states[dependent] == ActionState::Pending {
                    self.states[dependent] = ActionState::Ready;
                    self.ready.insert((self.position[dependent], dependent));
                }
            }
            return;
        }

        let verb = if state == ActionState::Failed {
            "failed"
        } else {
            "was skipped"
        };
        let reason = format!("dependency {} {verb}", self.actions[index].address);
        for dependent in self.graph.transitive_dependents(index) {
            if self.states[dependent].is_terminal() {
                continue;
            }
            log::debug!("Skipping {}: {reason}", self.actions[dependent].address);
            self.ready.remove(&(self.position[dependent], dependent));
            self.skip(dependent, &reason, progress);
        }
    }

    /// Skip everything that never ran
    fn skip_remaining<P: ProgressCallback>(&mut self, reason: &str, progress: &mut P) {
        self.ready.clear();
        for index in 0..self.actions.len() {
            if !self.states[index].is_terminal() {
                self.skip(index, reason, progress);
            }
        }
    }

    fn skip<P: ProgressCallback>(&mut self, index: usize, reason: &str, progress: &mut P) {
        let result = ActionResult::Skipped {
            reason: reason.to_string(),
        };
        self.states[index] = ActionState::Skipped;
        progress.on_resource_complete(&self.actions[index].address, &result);
        self.results[index] = Some(result);
    }

    /// Reports in plan order
    fn into_reports(self) -> Vec<ActionReport> {
        let mut order: Vec<usize> = (0..self.actions.len()).collect();
        order.sort_by_key(|&i| self.position[i]);
        order
            .into_iter()
            .map(|i| ActionReport {
                address: self.actions[i].address.clone(),
                kind: self.actions[i].kind,
                result: self.results[i].clone().unwrap_or(ActionResult::Skipped {
                    reason: "not run".to_string(),
                }),
                started: self.started[i],
                finished: self.finished[i],
            })
            .collect()
    }
}
