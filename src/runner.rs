use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Run a command in `dir` and capture trimmed stdout
pub fn run_capture_in(dir: &Path, cmd: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(cmd)
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("Command failed: {}", stderr.trim())
    }
}

/// Check if a command exists
pub fn command_exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Files git reports as changed or untracked under `dir`, relative to it
pub fn git_changed_files(dir: &Path) -> Result<Vec<String>> {
    let status = run_capture_in(dir, "git", &["status", "--porcelain", "--untracked-files=all"])?;
    Ok(parse_porcelain(&status))
}

/// Current HEAD revision, if `dir` is inside a git repository with commits
pub fn git_head(dir: &Path) -> Option<String> {
    run_capture_in(dir, "git", &["rev-parse", "HEAD"]).ok()
}

fn parse_porcelain(status: &str) -> Vec<String> {
    // the first line may have lost its leading space to trimming
    status
        .lines()
        .filter_map(|line| line.trim_start().split_once(' '))
        .map(|(_, path)| {
            let path = path.trim_start();
            // renames are reported as "old -> new"
            path.rsplit(" -> ").next().unwrap_or(path).trim_matches('"').to_string()
        })
        .filter(|path| !path.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_porcelain() {
        let status = " M src/lib.rs\n?? src/login.rs\nR  old.rs -> new.rs\nA  \"with space.rs\"\n";
        assert_eq!(
            parse_porcelain(status),
            vec![
                "src/lib.rs".to_string(),
                "src/login.rs".to_string(),
                "new.rs".to_string(),
                "with space.rs".to_string(),
            ]
        );
    }

    #[test]
    fn test_run_capture_in_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run_capture_in(dir.path(), "git", &["rev-parse", "--verify", "nope"]).is_err());
    }
}
