//! Path resolution for driftless project files
//!
//! # Environment Variables
//!
//! - `DRIFTLESS_SPEC` - Override the spec file
//! - `DRIFTLESS_STATE` - Override the state file
//! - `DRIFTLESS_CONFIG` - Override the settings file
//!
//! # Path Resolution Priority
//!
//! For spec_path() and state_path():
//! 1. Command-line flag
//! 2. Environment variable
//! 3. Default file name in the current directory
//!
//! For config_path():
//! 1. Command-line flag
//! 2. `DRIFTLESS_CONFIG` environment variable
//! 3. `driftless.toml` in the current directory, if it exists
//! 4. `<config dir>/driftless/config.toml`, if it exists
//! 5. None (built-in defaults)

use std::path::{Path, PathBuf};

/// Environment variable for the spec file override
pub const ENV_SPEC: &str = "DRIFTLESS_SPEC";

/// Environment variable for the state file override
pub const ENV_STATE: &str = "DRIFTLESS_STATE";

/// Environment variable for the settings file override
pub const ENV_CONFIG: &str = "DRIFTLESS_CONFIG";

pub const DEFAULT_SPEC_FILE: &str = "driftless.spec.toml";
pub const DEFAULT_STATE_FILE: &str = "driftless.state.json";
pub const DEFAULT_CONFIG_FILE: &str = "driftless.toml";

/// Resolve the spec file
pub fn spec_path(flag: Option<&Path>) -> PathBuf {
    resolve(flag, ENV_SPEC, std::env::var(ENV_SPEC).ok(), DEFAULT_SPEC_FILE)
}

/// Resolve the state file used when the spec declares no backend path
pub fn state_path(flag: Option<&Path>) -> PathBuf {
    resolve(flag, ENV_STATE, std::env::var(ENV_STATE).ok(), DEFAULT_STATE_FILE)
}

/// Resolve the optional settings file
pub fn config_path(flag: Option<&Path>) -> Option<PathBuf> {
    if flag.is_some() || std::env::var_os(ENV_CONFIG).is_some() {
        return Some(resolve(
            flag,
            ENV_CONFIG,
            std::env::var(ENV_CONFIG).ok(),
            DEFAULT_CONFIG_FILE,
        ));
    }

    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        log::debug!("Using settings from {}", local.display());
        return Some(local);
    }

    let user = dirs::config_dir()?.join("driftless").join("config.toml");
    if user.exists() {
        log::debug!("Using user settings from {}", user.display());
        return Some(user);
    }
    None
}

/// The directory holding the spec file; resource files are relative to it
pub fn project_root(spec: &Path) -> PathBuf {
    match spec.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn resolve(flag: Option<&Path>, var: &str, env_value: Option<String>, default: &str) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(value) = env_value.filter(|v| !v.is_empty()) {
        let path = expand(&value);
        log::debug!("Using {} from {}: {}", default, var, path.display());
        return path;
    }
    PathBuf::from(default)
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_wins_over_env() {
        let path = resolve(
            Some(Path::new("custom.toml")),
            ENV_SPEC,
            Some("/env/spec.toml".into()),
            DEFAULT_SPEC_FILE,
        );
        assert_eq!(path, PathBuf::from("custom.toml"));
    }

    #[test]
    fn test_env_wins_over_default() {
        let path = resolve(None, ENV_STATE, Some("/env/state.json".into()), DEFAULT_STATE_FILE);
        assert_eq!(path, PathBuf::from("/env/state.json"));
    }

    #[test]
    fn test_empty_env_falls_back_to_default() {
        let path = resolve(None, ENV_STATE, Some(String::new()), DEFAULT_STATE_FILE);
        assert_eq!(path, PathBuf::from(DEFAULT_STATE_FILE));
    }

    #[test]
    fn test_env_value_with_tilde() {
        let home = dirs::home_dir().unwrap();
        let path = resolve(None, ENV_SPEC, Some("~/project/spec.toml".into()), DEFAULT_SPEC_FILE);
        assert_eq!(path, home.join("project").join("spec.toml"));
    }

    #[test]
    fn test_project_root() {
        assert_eq!(project_root(Path::new("driftless.spec.toml")), PathBuf::from("."));
        assert_eq!(
            project_root(Path::new("/work/app/driftless.spec.toml")),
            PathBuf::from("/work/app")
        );
    }
}
