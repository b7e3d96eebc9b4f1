use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use converge::{ConvergeError, ExitStatus, Mutation, Resource, StateCommitter};

use super::{parse_address, state_backend};
use crate::Context;
use crate::ui;

pub fn list(ctx: &Context, kind: Option<&str>) -> Result<ExitStatus> {
    let committer = StateCommitter::open(state_backend(ctx))?;
    let resources = committer.state().list(kind);

    if resources.is_empty() {
        ui::info("No resources recorded");
        return Ok(ExitStatus::Success);
    }

    ui::header(&format!("State (serial {})", committer.serial()));
    let width = resources
        .iter()
        .map(|r| r.address.to_string().len())
        .max()
        .unwrap_or(0);
    for resource in &resources {
        println!(
            "  {:<width$}  {}",
            resource.address.to_string(),
            ui::status(resource.status)
        );
    }
    if !ctx.quiet {
        println!();
        ui::dim(&format!("{} resources", resources.len()));
    }
    Ok(ExitStatus::Success)
}

pub fn show(ctx: &Context, address: &str) -> Result<ExitStatus> {
    let address = parse_address(address)?;
    let committer = StateCommitter::open(state_backend(ctx))?;
    let resource = committer
        .state()
        .get(&address)
        .ok_or_else(|| ConvergeError::UnknownResource {
            address: address.clone(),
        })?;

    print_resource(ctx, resource);
    Ok(ExitStatus::Success)
}

fn print_resource(ctx: &Context, resource: &Resource) {
    ui::header(&resource.address.to_string());
    ui::kv("Status", &ui::status(resource.status).to_string());
    if let Some(reason) = resource
        .attribute_str("partial_reason")
        .or_else(|| resource.attribute_str("broken_reason"))
    {
        ui::kv("Reason", reason);
    }
    if let Some(agent) = &resource.agent {
        ui::kv("Agent", agent);
    }
    if let Some(updated) = resource.updated_at {
        ui::kv(
            "Updated",
            &format!(
                "{} ({})",
                updated.format("%Y-%m-%d %H:%M:%S UTC"),
                ui::time_ago(updated, Utc::now())
            ),
        );
    }

    if !resource.depends_on.is_empty() {
        ui::section("Depends on");
        for dep in &resource.depends_on {
            println!("  {dep}");
        }
    }
    if !resource.files.is_empty() {
        ui::section("Files");
        for file in &resource.files {
            println!("  {file}");
        }
    }
    if !resource.symbols.is_empty() {
        ui::section("Symbols");
        for (name, symbol) in &resource.symbols {
            let mark = if symbol.is_present() {
                "✓".green()
            } else {
                "✗".red()
            };
            match &symbol.location {
                Some(at) if ctx.verbose > 0 => {
                    println!("  {mark} {name} {}", format!("{}:{}", at.file, at.line_start).dimmed());
                }
                _ => println!("  {mark} {name}"),
            }
        }
    }
    if ctx.verbose > 0 && !resource.attributes.is_empty() {
        ui::section("Attributes");
        for (key, value) in &resource.attributes {
            ui::kv(key, &value.to_string());
        }
    }
}

pub fn rm(ctx: &Context, address: &str) -> Result<ExitStatus> {
    let address = parse_address(address)?;
    let backend = state_backend(ctx);
    let locks = converge::LockManager::new(std::sync::Arc::clone(&backend));
    let guard = locks.acquire(&converge::default_holder(), "state rm")?;

    let mut committer = StateCommitter::open(backend)?;
    committer.commit(
        &guard,
        &Mutation::Remove {
            address: address.clone(),
        },
    )?;
    guard.release()?;

    ui::success(&format!("Removed {address} from state"));
    if !ctx.quiet {
        ui::dim("Files on disk were not touched");
    }
    Ok(ExitStatus::Success)
}
