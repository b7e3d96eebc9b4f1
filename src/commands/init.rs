use anyhow::{Context as AnyhowContext, Result};
use converge::ExitStatus;
use std::fs;

use crate::Context;
use crate::paths;
use crate::ui;

const EXAMPLE_SPEC: &str = r#"# Resources this codebase should have.
# Run `driftless plan` to see the gap and `driftless apply` to close it.
version = "1"

[backend]
type = "local"
path = "driftless.state.json"

[resources.feature.user_login]
files = ["src/auth/login.rs"]
symbols = ["login", "verify_password"]

[resources.feature.user_login.attributes]
description = "Email and password login"

[resources.feature.session_refresh]
depends_on = ["feature.user_login"]
files = ["src/auth/session.rs"]
symbols = ["refresh"]

[resources.feature.session_refresh.attributes]
description = "Refresh expiring sessions"
"#;

pub fn run(ctx: &Context, force: bool) -> Result<ExitStatus> {
    let path = paths::spec_path(ctx.spec.as_deref());
    if path.exists() && !force {
        ui::warn(&format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
        return Ok(ExitStatus::ExecutionError);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    fs::write(&path, EXAMPLE_SPEC).with_context(|| format!("Could not write {}", path.display()))?;

    ui::success(&format!("Wrote {}", path.display()));
    if !ctx.quiet {
        ui::dim("Edit the resources, then run `driftless plan`");
    }
    Ok(ExitStatus::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{Spec, graph};

    #[test]
    fn test_example_spec_is_valid() {
        let spec = Spec::from_toml_str(EXAMPLE_SPEC).unwrap();
        assert_eq!(spec.len(), 2);
        assert!(graph::validate(&spec).is_empty());
    }
}
