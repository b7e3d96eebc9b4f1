use anyhow::Result;
use colored::Colorize;
use converge::refresh::refresh;
use converge::{ExitStatus, PlanAction, ProviderChain, RefreshEntry, planner};

use super::Project;
use crate::Context;
use crate::cli::RefreshArgs;
use crate::inference::RegexInference;
use crate::ui;

pub fn run(ctx: &Context, args: &RefreshArgs) -> Result<ExitStatus> {
    let project = Project::load(ctx)?;
    let root = args
        .project_root
        .clone()
        .unwrap_or_else(|| project.root.clone());
    let chain = ProviderChain::new().with(RegexInference);

    if !ctx.quiet {
        ui::info(&format!(
            "Scanning {} for {} resources",
            root.display(),
            project.spec.len()
        ));
    }

    if args.dry_run {
        let committer = project.committer()?;
        let entries = refresh(&project.spec, committer.state(), &chain, &root, args.force);
        print_report(ctx, &entries);
        println!();
        ui::dim("Dry run: state not modified");
        return Ok(ExitStatus::Success);
    }

    let guard = project.lock("refresh")?;
    let mut committer = project.committer()?;
    let entries = refresh(&project.spec, committer.state(), &chain, &root, args.force);
    print_report(ctx, &entries);

    let mut updated = Vec::new();
    for entry in &entries {
        if let Some(mutation) = &entry.mutation {
            committer.commit(&guard, mutation)?;
            updated.push(&entry.address);
        }
    }

    println!();
    if updated.is_empty() {
        ui::info("No changes to state");
    } else {
        ui::success(&format!(
            "Updated {} resources in state (serial {})",
            updated.len(),
            committer.serial()
        ));
    }

    if args.show_plan {
        let plan = planner::diff(&project.spec, committer.state())?;
        let shown: Vec<&PlanAction> = plan.actionable().collect();
        println!();
        super::plan::print_plan(ctx, &plan, &shown);
    }
    guard.release()?;

    Ok(ExitStatus::Success)
}

fn print_report(ctx: &Context, entries: &[RefreshEntry]) {
    ui::header("Refresh");
    let width = entries
        .iter()
        .map(|e| e.address.to_string().len())
        .max()
        .unwrap_or(0);

    for entry in entries {
        let inference = &entry.inference;
        let verdict = match entry.note {
            Some(note) => note.dimmed(),
            None => "will record".green(),
        };
        println!(
            "  {:<width$}  {:>4.0}%  {}  {verdict}",
            entry.address.to_string(),
            inference.confidence * 100.0,
            ui::status(inference.status),
        );
        if ctx.verbose > 0 {
            for line in &inference.evidence {
                println!("      {}", line.dimmed());
            }
        }
    }
}
