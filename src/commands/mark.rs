use anyhow::Result;
use converge::{ExitStatus, Mutation, ResourceSpec, SymbolPresence, SymbolStatus};
use std::collections::BTreeMap;

use super::{Project, parse_address};
use crate::Context;
use crate::cli::{MarkArgs, MarkStatus};
use crate::ui;

pub fn run(ctx: &Context, args: MarkArgs) -> Result<ExitStatus> {
    let project = Project::load(ctx)?;
    let address = parse_address(&args.address)?;

    if !project.spec.contains(&address) {
        ui::warn(&format!("{address} is not declared in the spec; the next plan will delete it"));
    }

    let mutation = match args.status {
        MarkStatus::Implemented => {
            let declared = project.spec.get(&address).cloned().unwrap_or_default();
            Mutation::MarkCreated {
                address: address.clone(),
                files: if args.files.is_empty() {
                    declared.files.clone()
                } else {
                    args.files
                },
                symbols: declared_symbols(&declared),
                depends_on: declared.depends_on,
                agent: Some(args.agent.unwrap_or_else(|| "manual".to_string())),
            }
        }
        MarkStatus::Partial => Mutation::MarkPartial {
            address: address.clone(),
            reason: args.reason.unwrap_or_default(),
        },
        MarkStatus::Broken => Mutation::MarkBroken {
            address: address.clone(),
            reason: args.reason.unwrap_or_default(),
        },
    };

    let guard = project.lock("mark")?;
    let mut committer = project.committer()?;
    let state = committer.commit(&guard, &mutation)?;
    let status = state.status_of(&address);
    guard.release()?;

    if let Some(status) = status {
        ui::success(&format!("{address} is now {}", ui::status(status)));
    }
    Ok(ExitStatus::Success)
}

/// Marking by hand vouches for every declared symbol
fn declared_symbols(declared: &ResourceSpec) -> BTreeMap<String, SymbolStatus> {
    declared
        .symbols
        .iter()
        .map(|name| {
            (
                name.clone(),
                SymbolStatus {
                    kind: "declared".to_string(),
                    status: SymbolPresence::Implemented,
                    location: None,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{Address, State, planner};

    #[test]
    fn test_marked_resource_needs_no_further_work() {
        let address: Address = "feature.login".parse().unwrap();
        let declared = ResourceSpec::new()
            .with_file("src/login.rs")
            .with_symbol("login")
            .with_symbol("Session.refresh");
        let spec = converge::Spec::new().with(address.clone(), declared.clone());

        let mut state = State::new();
        state
            .apply(
                &Mutation::MarkCreated {
                    address,
                    files: declared.files.clone(),
                    symbols: declared_symbols(&declared),
                    depends_on: declared.depends_on.clone(),
                    agent: Some("manual".into()),
                },
                chrono::Utc::now(),
            )
            .unwrap();

        assert!(!planner::diff(&spec, &state).unwrap().has_changes());
    }
}
