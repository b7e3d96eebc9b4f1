//! # Converge
//!
//! A convergence engine for declared software resources.
//!
//! A [`Spec`] declares resources (`kind.name` addresses) and how they depend on
//! each other. A [`State`] records what actually exists. The planner diffs the
//! two; the scheduler applies the gap in dependency order on a bounded worker
//! pool, verifying and committing each outcome under a state lock.
//!
//! ## Core Concepts
//!
//! - **Spec / State**: declared intent and the machine-owned record
//! - **Plan**: ordered create/update/delete/no-op actions, never persisted
//! - **Executor**: strategy that converges one action (interactive, auto,
//!   hybrid, market)
//! - **Verification**: nested levels `basic`, `git_diff` and `full`
//! - **Refresh**: inference over the codebase recorded straight into state
//! - **Backend**: storage with optimistic serials and an optional lock
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     AutoDecline, LockManager, MemoryBackend, NoProgress, Scheduler, Spec, StateCommitter,
//!     ApplyOptions, planner,
//! };
//! use std::sync::Arc;
//!
//! let spec = Spec::load("driftless.spec.toml".as_ref())?;
//! let backend: Arc<dyn converge::Backend> = Arc::new(MemoryBackend::new());
//!
//! let locks = LockManager::new(Arc::clone(&backend));
//! let guard = locks.acquire(&converge::default_holder(), "apply")?;
//! let mut committer = StateCommitter::open(Arc::clone(&backend))?;
//!
//! let plan = planner::diff(&spec, committer.state())?;
//! let scheduler = Scheduler::new(&spec, executor, &ApplyOptions::default(), ".");
//! let report = scheduler.apply(&plan, &mut committer, &guard, &mut NoProgress, &mut AutoDecline)?;
//! println!("{report}");
//! ```
//!
//! ## Collaborator Traits
//!
//! The engine does no terminal I/O, process spawning or HTTP itself:
//!
//! - [`Operator`]: a human making decisions and reviewing agent output
//! - [`AgentDispatcher`]: runs a named coding agent
//! - [`MarketClient`]: posts and polls bounty tasks
//! - [`InferenceProvider`]: judges whether code implements a resource
//! - [`ProgressCallback`] / [`ConfirmCallback`]: progress and confirmation

pub mod backend;
pub mod commit;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod inference;
pub mod lock;
pub mod model;
pub mod planner;
pub mod refresh;
pub mod scheduler;
pub mod spec;
pub mod types;
pub mod verify;

// Re-export main types at crate root
pub use backend::{Backend, FileBackend, MemoryBackend};
pub use commit::StateCommitter;
pub use context::{AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, NoProgress, ProgressCallback};
pub use error::{AgentAttempt, ConvergeError, ErrorCategory, ExecutorError, ExitStatus, Result};
pub use executor::{
    AgentDispatcher, AgentReport, AgentRequest, AutoExecutor, Decision, ExecOutcome,
    ExecutionContext, ExecutionMode, Executor, HybridExecutor, InteractiveExecutor, MarketClient,
    MarketExecutor, MarketStatus, MarketTask, Operator, Review,
};
pub use graph::{DependencyGraph, GraphError};
pub use inference::{Inference, InferenceProvider, ProviderChain};
pub use lock::{LockGuard, LockInfo, LockManager, default_holder};
pub use model::{Address, Mutation, Resource, State, Status, SymbolPresence, SymbolStatus};
pub use planner::{ActionKind, Plan, PlanAction};
pub use refresh::RefreshEntry;
pub use scheduler::{ActionReport, ApplyReport, Scheduler};
pub use spec::{BackendConfig, BackendKind, ResourceSpec, Spec};
pub use types::{ActionResult, ActionState, ApplyOptions, ApplySummary};
pub use verify::{Verification, Verifier, VerifyLevel};
