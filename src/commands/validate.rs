use anyhow::Result;
use converge::{DependencyGraph, ExitStatus, graph};

use super::Project;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context) -> Result<ExitStatus> {
    let project = Project::load(ctx)?;

    let errors = graph::validate(&project.spec);
    if !errors.is_empty() {
        for error in &errors {
            ui::error(&error.to_string());
        }
        ui::error(&format!("{} problems in {}", errors.len(), project.spec_path.display()));
        return Ok(ExitStatus::SpecInvalid);
    }

    let levels = DependencyGraph::from_spec(&project.spec).topological_levels()?;
    ui::success(&format!(
        "{} is valid: {} resources in {} dependency levels",
        project.spec_path.display(),
        project.spec.len(),
        levels.len()
    ));

    if ctx.verbose > 0 {
        for (depth, level) in levels.iter().enumerate() {
            let names: Vec<String> = level.iter().map(ToString::to_string).collect();
            ui::kv(&format!("level {depth}"), &names.join(", "));
        }
    }
    Ok(ExitStatus::Success)
}
