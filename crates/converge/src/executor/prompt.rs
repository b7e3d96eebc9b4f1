//! Task prompts shown to operators and sent to agents

use super::ExecutionContext;
use crate::planner::{ActionKind, PlanAction};

/// Render the full task description for one action
pub fn build(action: &PlanAction, context: &ExecutionContext) -> String {
    let mut sections = vec![header(action, context), details(action, context)];

    if let Some(deps) = dependencies(context) {
        sections.push(deps);
    }
    if let Some(files) = files(context) {
        sections.push(files);
    }
    sections.push(instructions(action));

    sections.join("\n\n")
}

fn header(action: &PlanAction, context: &ExecutionContext) -> String {
    format!(
        "# Task: {} {}\n\nProject root: {}",
        action.kind.as_str().to_uppercase(),
        action.address,
        context.root.display()
    )
}

fn details(action: &PlanAction, context: &ExecutionContext) -> String {
    let mut lines = vec![
        format!("## Resource: {}", action.address),
        format!("- Kind: {}", action.address.kind()),
        format!("- Name: {}", action.address.name()),
        format!(
            "- Current status: {}",
            context
                .current_status
                .map_or("not in state", |s| s.as_str())
        ),
    ];

    let attributes: Vec<_> = context
        .resource
        .attributes
        .iter()
        .filter(|(key, _)| key.as_str() != "files")
        .collect();
    if !attributes.is_empty() {
        lines.push(String::new());
        lines.push("### Attributes".to_string());
        for (key, value) in attributes {
            let rendered = value
                .as_str()
                .map_or_else(|| value.to_string(), str::to_string);
            lines.push(format!("- {key}: {rendered}"));
        }
    }

    if !context.resource.symbols.is_empty() {
        lines.push(String::new());
        lines.push("### Required symbols".to_string());
        for symbol in &context.resource.symbols {
            lines.push(format!("- {symbol}"));
        }
    }

    if let Some(detail) = &action.partial {
        lines.push(String::new());
        lines.push(format!("Still missing: {detail}"));
    }

    lines.join("\n")
}

fn dependencies(context: &ExecutionContext) -> Option<String> {
    if context.dependencies.is_empty() {
        return None;
    }
    let mut lines = vec!["## Dependencies".to_string()];
    for (address, info) in &context.dependencies {
        match info.status {
            Some(status) if info.files.is_empty() => {
                lines.push(format!("- {address}: {status}"));
            }
            Some(status) => {
                let shown: Vec<&str> = info.files.iter().take(3).map(String::as_str).collect();
                lines.push(format!("- {address}: {status} (files: {})", shown.join(", ")));
            }
            None => lines.push(format!("- {address}: not in state")),
        }
    }
    Some(lines.join("\n"))
}

fn files(context: &ExecutionContext) -> Option<String> {
    let files = context.suggested_files();
    if files.is_empty() {
        return None;
    }
    let mut lines = vec!["## Suggested files".to_string()];
    for file in files {
        match std::fs::metadata(context.root.join(&file)) {
            Ok(meta) => lines.push(format!("- `{file}` (exists, {} bytes): update", meta.len())),
            Err(_) => lines.push(format!("- `{file}` (does not exist): create")),
        }
    }
    Some(lines.join("\n"))
}

fn instructions(action: &PlanAction) -> String {
    let mut lines = vec!["## Instructions".to_string()];
    lines.push(
        match action.kind {
            ActionKind::Create => "Implement this resource from scratch.",
            ActionKind::Update => "Update the existing implementation to match the declaration.",
            ActionKind::Delete => "Remove this resource's implementation.",
            ActionKind::NoOp => "Nothing to do; the resource is converged.",
        }
        .to_string(),
    );
    if !action.reason.is_empty() {
        lines.push(format!("\nReason: {}", action.reason));
    }
    lines.push("\nRequirements:".to_string());
    lines.push("1. Create or modify the necessary files".to_string());
    lines.push("2. Follow the existing code style and patterns".to_string());
    lines.push("3. Handle errors explicitly".to_string());
    lines.push("4. Add tests where the project expects them".to_string());
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DependencyInfo;
    use crate::executor::testing::action;
    use crate::model::Status;
    use crate::spec::ResourceSpec;

    #[test]
    fn test_prompt_sections() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("login.rs"), "fn login() {}").unwrap();

        let mut resource = ResourceSpec::new()
            .with_file("login.rs")
            .with_file("session.rs")
            .with_symbol("login");
        resource
            .attributes
            .insert("description".into(), "User login".into());

        let mut context = ExecutionContext::new(resource, dir.path());
        context.dependencies.insert(
            "module.db".parse().unwrap(),
            DependencyInfo {
                status: Some(Status::Implemented),
                files: vec!["src/db.rs".into()],
            },
        );

        let prompt = build(&action("feature.login"), &context);
        assert!(prompt.starts_with("# Task: CREATE feature.login"));
        assert!(prompt.contains("- description: User login"));
        assert!(prompt.contains("- login"));
        assert!(prompt.contains("module.db: implemented (files: src/db.rs)"));
        assert!(prompt.contains("`login.rs` (exists, 13 bytes): update"));
        assert!(prompt.contains("`session.rs` (does not exist): create"));
        assert!(prompt.contains("Implement this resource from scratch."));
    }

    #[test]
    fn test_prompt_without_optional_sections() {
        let context = ExecutionContext::new(ResourceSpec::new(), ".");
        let prompt = build(&action("feature.bare"), &context);
        assert!(!prompt.contains("## Dependencies"));
        assert!(!prompt.contains("## Suggested files"));
        assert!(prompt.contains("Current status: not in state"));
    }
}
