use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use converge::{ExecutionMode, VerifyLevel};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "driftless")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declare the resources a codebase should have and converge the gap", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Spec file [default: driftless.spec.toml]
    #[arg(long, global = true, env = "DRIFTLESS_SPEC")]
    pub spec: Option<PathBuf>,

    /// State file, when the spec names no backend path [default: driftless.state.json]
    #[arg(long, global = true, env = "DRIFTLESS_STATE")]
    pub state: Option<PathBuf>,

    /// Settings file [default: ./driftless.toml]
    #[arg(long, global = true, env = "DRIFTLESS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write an example spec to start from
    Init {
        /// Overwrite an existing spec
        #[arg(short, long)]
        force: bool,
    },

    /// Check the spec and its dependency graph
    Validate,

    /// Show what apply would change
    Plan(PlanArgs),

    /// Converge state towards the spec
    Apply(ApplyArgs),

    /// Record the status of a resource by hand
    Mark(MarkArgs),

    /// Scan the codebase and record what is already implemented
    Refresh(RefreshArgs),

    /// Inspect or edit recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Break a stale state lock
    ForceUnlock {
        /// Lock ID shown in the lock conflict error
        lock_id: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Exit with 2 when there are pending changes
    #[arg(long)]
    pub detailed_exitcode: bool,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,

    /// List actions whose dependencies are not implemented yet
    #[arg(long)]
    pub check_deps: bool,

    /// Include no-op actions
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Execution mode [default: from settings, else interactive]
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Agent chain for auto and hybrid modes, tried in order (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub agents: Vec<String>,

    /// Maximum concurrent actions
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-attempt agent timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Verification level
    #[arg(long, value_enum)]
    pub verify: Option<VerifyArg>,

    /// Apply a single resource; its dependencies must be implemented
    #[arg(short, long)]
    pub resource: Option<String>,

    /// Describe what would be done without doing it
    #[arg(short, long)]
    pub dry_run: bool,

    /// Confirm deletes without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Directory agents work in [default: the spec's directory]
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Bounty per market task
    #[arg(long)]
    pub bounty: Option<f64>,

    /// Market API base URL
    #[arg(long)]
    pub market_url: Option<String>,

    /// Git revision for diff verification [default: HEAD at start]
    #[arg(long)]
    pub baseline: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Interactive,
    Auto,
    Hybrid,
    Market,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Interactive => Self::Interactive,
            ModeArg::Auto => Self::Auto,
            ModeArg::Hybrid => Self::Hybrid,
            ModeArg::Market => Self::Market,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum VerifyArg {
    Basic,
    GitDiff,
    Full,
}

impl From<VerifyArg> for VerifyLevel {
    fn from(level: VerifyArg) -> Self {
        match level {
            VerifyArg::Basic => Self::Basic,
            VerifyArg::GitDiff => Self::GitDiff,
            VerifyArg::Full => Self::Full,
        }
    }
}

// ============================================================================
// Mark
// ============================================================================

#[derive(Parser)]
pub struct MarkArgs {
    /// Resource address (kind.name)
    pub address: String,

    /// Status to record
    #[arg(value_enum, default_value = "implemented")]
    pub status: MarkStatus,

    /// Implementing files (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub files: Vec<String>,

    /// Why the resource is partial or broken
    #[arg(short, long)]
    pub reason: Option<String>,

    /// Who implemented it
    #[arg(long)]
    pub agent: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MarkStatus {
    Implemented,
    Partial,
    Broken,
}

// ============================================================================
// Refresh
// ============================================================================

#[derive(Parser)]
pub struct RefreshArgs {
    /// Report what would be recorded without writing state
    #[arg(short, long)]
    pub dry_run: bool,

    /// Also update resources already recorded in state
    #[arg(short, long)]
    pub force: bool,

    /// Directory to scan [default: the spec's directory]
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Print the plan after refreshing
    #[arg(long)]
    pub show_plan: bool,
}

// ============================================================================
// State Commands
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List {
        /// Only resources of this kind
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Show one recorded resource
    Show {
        /// Resource address (kind.name)
        address: String,
    },

    /// Remove a resource from state (files are left alone)
    Rm {
        /// Resource address (kind.name)
        address: String,
    },
}
