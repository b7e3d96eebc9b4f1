use anyhow::Result;
use colored::Colorize;
use converge::planner::{self, BlockedAction};
use converge::{ActionKind, ExitStatus, Plan, PlanAction};
use serde::Serialize;

use super::Project;
use crate::Context;
use crate::cli::PlanArgs;
use crate::ui;

/// Machine-readable plan for `--json`
#[derive(Serialize)]
struct PlanDocument<'a> {
    convergence: f64,
    summary: String,
    actions: Vec<&'a PlanAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocked: Option<&'a [BlockedAction]>,
}

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<ExitStatus> {
    let project = Project::load(ctx)?;
    let committer = project.committer()?;
    let plan = planner::diff(&project.spec, committer.state())?;
    let blocked = args
        .check_deps
        .then(|| planner::check_dependencies(&plan, committer.state()));

    let shown: Vec<&PlanAction> = plan
        .actions
        .iter()
        .filter(|a| args.all || a.is_actionable())
        .collect();

    if args.json {
        let document = PlanDocument {
            convergence: plan.convergence,
            summary: plan.summary(),
            actions: shown,
            blocked: blocked.as_deref(),
        };
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        print_plan(ctx, &plan, &shown);
        if let Some(blocked) = &blocked {
            print_blocked(blocked);
        }
    }

    if args.detailed_exitcode && plan.has_changes() {
        Ok(ExitStatus::PendingChanges)
    } else {
        Ok(ExitStatus::Success)
    }
}

pub(super) fn print_plan(ctx: &Context, plan: &Plan, shown: &[&PlanAction]) {
    ui::header("Plan");

    for action in shown {
        println!(
            "  {} {} {}",
            ui::action_symbol(action.kind),
            action.address,
            format!("({})", action.reason).dimmed()
        );
        if ctx.verbose > 0 && !action.dependencies.is_empty() {
            let deps: Vec<String> = action.dependencies.iter().map(ToString::to_string).collect();
            ui::dim(&format!("    depends on {}", deps.join(", ")));
        }
    }

    println!();
    ui::kv("Convergence", &ui::convergence_bar(plan.convergence, 20));
    if plan.has_changes() {
        ui::info(&format!("Plan: {}", plan.summary()));
        if plan.count(ActionKind::Delete) > 0 && !ctx.quiet {
            ui::dim("Deletes only remove state records and are confirmed one by one");
        }
    } else {
        ui::success(&plan.summary());
    }
}

fn print_blocked(blocked: &[BlockedAction]) {
    ui::section("Blocked");
    if blocked.is_empty() {
        ui::dim("every pending action has its dependencies implemented");
        return;
    }
    for entry in blocked {
        println!("  {} {entry}", "⊘".yellow());
    }
}
