use anyhow::{Result, bail};
use colored::Colorize;
use converge::{
    ApplyOptions, ApplyReport, AutoConfirm, AutoDecline, AutoExecutor, ConfirmCallback,
    ExecutionMode, Executor, ExitStatus, HybridExecutor, InteractiveExecutor, LockGuard,
    MarketExecutor, Plan, Scheduler, StateCommitter, Verifier, VerifyLevel, planner,
};
use std::sync::Arc;
use std::time::Duration;

use super::{Project, parse_address};
use crate::Context;
use crate::agents::SubprocessDispatcher;
use crate::cli::ApplyArgs;
use crate::config::Settings;
use crate::inference::RegexInference;
use crate::market::HttpMarketClient;
use crate::operator::{TerminalConfirm, TerminalOperator};
use crate::paths;
use crate::progress::ApplyProgress;
use crate::runner;
use crate::ui;

/// Apply settings after merging flags over `driftless.toml`
struct Resolved {
    mode: ExecutionMode,
    verify: VerifyLevel,
    workers: usize,
    timeout: Duration,
    agents: Vec<String>,
}

impl Resolved {
    fn new(args: &ApplyArgs, settings: &Settings) -> Self {
        Self {
            mode: args.mode.map_or(settings.apply.mode, Into::into),
            verify: args.verify.map_or(settings.apply.verify, Into::into),
            workers: args.workers.unwrap_or(settings.apply.workers).max(1),
            timeout: Duration::from_secs(args.timeout.unwrap_or(settings.apply.timeout_secs)),
            agents: if args.agents.is_empty() {
                settings.apply.agents.clone()
            } else {
                args.agents.clone()
            },
        }
    }
}

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<ExitStatus> {
    let project = Project::load(ctx)?;
    let settings = Settings::load(paths::config_path(ctx.config.as_deref()).as_deref())?;
    let resolved = Resolved::new(&args, &settings);
    let root = args
        .project_root
        .clone()
        .unwrap_or_else(|| project.root.clone());
    let target = args.resource.as_deref().map(parse_address).transpose()?;

    // market dry runs still go through the executor to preview tasks
    if args.dry_run && resolved.mode != ExecutionMode::Market {
        let committer = project.committer()?;
        let plan = planner::diff(&project.spec, committer.state())?;
        let plan = match &target {
            Some(address) => plan.select(address)?,
            None => plan,
        };
        print_dry_run(&plan, &resolved);
        return Ok(ExitStatus::Success);
    }

    let guard = project.lock("apply")?;
    let mut committer = project.committer()?;
    let plan = planner::diff(&project.spec, committer.state())?;
    if !plan.has_changes() {
        ui::success(&plan.summary());
        guard.release()?;
        return Ok(ExitStatus::Success);
    }

    ui::header(&format!("Apply ({})", resolved.mode));
    ui::kv("Plan", &plan.summary());
    ui::kv("Convergence", &ui::convergence_bar(plan.convergence, 20));
    ui::kv(
        "Workers",
        &format!("{} ({} verification)", resolved.workers, resolved.verify),
    );
    if matches!(resolved.mode, ExecutionMode::Auto | ExecutionMode::Hybrid) {
        ui::kv("Agents", &resolved.agents.join(" → "));
    }
    println!();

    let executor = build_executor(&resolved, &settings, &args)?;
    let options = ApplyOptions {
        workers: resolved.workers,
        verify: resolved.verify,
    };
    let scheduler = Scheduler::new(&project.spec, executor, &options, &root)
        .with_verifier(build_verifier(&resolved, &root, args.baseline.clone()));

    let show_bar =
        !ctx.quiet && matches!(resolved.mode, ExecutionMode::Auto | ExecutionMode::Market);
    let mut progress = ApplyProgress::new(show_bar);

    let run = ApplyRun {
        scheduler: &scheduler,
        plan: &plan,
        target: target.as_ref(),
        guard: &guard,
    };
    let report = if args.dry_run {
        run.execute(&mut committer, &mut progress, &mut AutoDecline)?
    } else if args.yes {
        run.execute(&mut committer, &mut progress, &mut AutoConfirm)?
    } else {
        run.execute(&mut committer, &mut progress, &mut TerminalConfirm)?
    };

    print_summary(&report, planner::convergence(&project.spec, committer.state()));
    guard.release()?;

    if report.is_success() {
        Ok(ExitStatus::Success)
    } else {
        Ok(ExitStatus::ExecutionError)
    }
}

/// Everything one apply needs besides the callbacks
struct ApplyRun<'a> {
    scheduler: &'a Scheduler<'a>,
    plan: &'a Plan,
    target: Option<&'a converge::Address>,
    guard: &'a LockGuard,
}

impl ApplyRun<'_> {
    fn execute<C: ConfirmCallback>(
        &self,
        committer: &mut StateCommitter,
        progress: &mut ApplyProgress,
        confirm: &mut C,
    ) -> Result<ApplyReport> {
        let report = match self.target {
            Some(address) => self.scheduler.apply_resource(
                self.plan, address, committer, self.guard, progress, confirm,
            )?,
            None => self
                .scheduler
                .apply(self.plan, committer, self.guard, progress, confirm)?,
        };
        Ok(report)
    }
}

fn build_executor(
    resolved: &Resolved,
    settings: &Settings,
    args: &ApplyArgs,
) -> Result<Arc<dyn Executor>> {
    let executor: Arc<dyn Executor> = match resolved.mode {
        ExecutionMode::Interactive => {
            Arc::new(InteractiveExecutor::new(Arc::new(TerminalOperator::new())))
        }
        ExecutionMode::Auto => Arc::new(auto_executor(resolved, settings)?),
        ExecutionMode::Hybrid => Arc::new(HybridExecutor::new(
            auto_executor(resolved, settings)?,
            Arc::new(TerminalOperator::new()),
        )),
        ExecutionMode::Market => {
            let market = &settings.market;
            let api_key = std::env::var(&market.api_key_env)
                .ok()
                .filter(|k| !k.is_empty());
            if api_key.is_none() && !args.dry_run {
                bail!(
                    "Market mode needs an API key in ${} (or use --dry-run to preview tasks)",
                    market.api_key_env
                );
            }
            let base_url = args
                .market_url
                .clone()
                .unwrap_or_else(|| market.base_url.clone());
            let client = HttpMarketClient::new(base_url, api_key);
            Arc::new(
                MarketExecutor::new(Arc::new(client))
                    .with_bounty(args.bounty.unwrap_or(market.bounty))
                    .with_poll_interval(Duration::from_secs(market.poll_secs))
                    .with_timeout(Duration::from_secs(market.timeout_secs))
                    .dry_run(args.dry_run),
            )
        }
    };
    Ok(executor)
}

fn auto_executor(resolved: &Resolved, settings: &Settings) -> Result<AutoExecutor> {
    let dispatcher = SubprocessDispatcher::from_settings(settings, &resolved.agents)?;
    Ok(AutoExecutor::new(
        Arc::new(dispatcher),
        resolved.agents.clone(),
        resolved.timeout,
    ))
}

fn build_verifier(
    resolved: &Resolved,
    root: &std::path::Path,
    baseline: Option<String>,
) -> Verifier {
    let mut verifier = Verifier::new(resolved.verify, root);
    if resolved.verify >= VerifyLevel::GitDiff {
        match baseline.or_else(|| runner::git_head(root)) {
            Some(revision) => {
                log::debug!("Diff verification against {revision}");
                verifier = verifier.with_baseline(revision);
            }
            None => log::warn!("No git baseline found; diff verification compares the work tree"),
        }
    }
    if resolved.verify == VerifyLevel::Full {
        verifier = verifier.with_inference(Arc::new(RegexInference));
    }
    verifier
}

fn print_dry_run(plan: &Plan, resolved: &Resolved) {
    ui::header(&format!("Dry run ({})", resolved.mode));
    for action in plan.actionable() {
        println!(
            "  {} {} {}",
            ui::action_symbol(action.kind),
            action.address,
            format!("({})", action.reason).dimmed()
        );
    }
    println!();
    ui::info(&format!("Plan: {}", plan.summary()));
}

fn print_summary(report: &ApplyReport, convergence: f64) {
    println!();
    if report.is_success() {
        ui::success(&format!("Apply complete: {report}"));
    } else {
        ui::warn(&format!("Apply finished with problems: {report}"));
    }
    ui::kv("Convergence", &ui::convergence_bar(convergence, 20));
}
