//! Subprocess coding agents
//!
//! Each agent is a command that reads its task on stdin and edits files in
//! the project root. Touched files are taken from `git status` before and
//! after the run, and kept only when the resource declares them or the agent
//! names them in its output. Other agents may be writing at the same time.

use crate::config::{AgentCommand, Settings};
use crate::runner;
use anyhow::{Context, Result};
use converge::{AgentDispatcher, AgentReport, AgentRequest};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs configured agent commands as child processes
pub struct SubprocessDispatcher {
    agents: BTreeMap<String, AgentCommand>,
}

impl SubprocessDispatcher {
    /// Resolve every agent of `chain`, failing on unknown ids
    pub fn from_settings(settings: &Settings, chain: &[String]) -> Result<Self> {
        let mut agents = BTreeMap::new();
        for id in chain {
            let command = settings.agent(id).with_context(|| {
                format!(
                    "Unknown agent '{id}' (available: {})",
                    settings.known_agents().join(", ")
                )
            })?;
            if !runner::command_exists(&command.command) {
                log::warn!("Agent '{id}' command not found on PATH: {}", command.command);
            }
            agents.insert(id.clone(), command);
        }
        Ok(Self { agents })
    }
}

impl AgentDispatcher for SubprocessDispatcher {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentReport> {
        let command = self
            .agents
            .get(&request.agent)
            .with_context(|| format!("Agent '{}' is not configured", request.agent))?;

        let before = changed_files(&request.root);
        log::info!("Running agent {} for {}", request.agent, request.address);

        let mut child = Command::new(&command.command)
            .args(&command.args)
            .envs(&command.env)
            .current_dir(&request.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Agent command not found: {}", command.command))?;

        let stdin_writer = child.stdin.take().map(|mut stdin| {
            let prompt = request.prompt.clone();
            std::thread::spawn(move || {
                // the agent may exit without reading everything
                let _ = stdin.write_all(prompt.as_bytes());
            })
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let finished = wait_with_timeout(&mut child, request.timeout)?;
        if let Some(writer) = stdin_writer {
            let _ = writer.join();
        }
        let output = collect(stdout);
        let errors = collect(stderr);

        let Some(status) = finished else {
            anyhow::bail!("Agent timed out after {}s", request.timeout.as_secs());
        };
        if !status.success() {
            anyhow::bail!(
                "{} exited with {status}: {}",
                command.command,
                last_line(&errors).unwrap_or("no error output")
            );
        }

        let after = changed_files(&request.root);
        let files = claimed_files(after.difference(&before), &request.scope, &output);
        log::debug!("Agent {} touched {} files", request.agent, files.len());

        Ok(AgentReport {
            agent: request.agent.clone(),
            files,
            output,
        })
    }
}

/// Wait for the child; kill it once `timeout` passes and return `None`
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().context("Failed to wait for agent")? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            log::warn!("Killing agent process {} after timeout", child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = pipe.read_to_string(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().find(|l| !l.trim().is_empty()).map(str::trim)
}

/// Changed paths this agent can vouch for
fn claimed_files<'a>(
    changed: impl Iterator<Item = &'a String>,
    scope: &[String],
    output: &str,
) -> Vec<String> {
    let named: BTreeSet<&str> = output
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '`' | '\'' | '"'))
        .map(|word| word.trim_start_matches("./"))
        .filter(|word| !word.is_empty())
        .collect();
    changed
        .filter(|path| scope.contains(path) || named.contains(path.as_str()))
        .cloned()
        .collect()
}

fn changed_files(root: &Path) -> BTreeSet<String> {
    match runner::git_changed_files(root) {
        Ok(files) => files.into_iter().collect(),
        Err(e) => {
            log::debug!("No git file list for {}: {e:#}", root.display());
            BTreeSet::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_agents(scripts: &[(&str, &str)]) -> SubprocessDispatcher {
        let mut settings = Settings::default();
        for (id, script) in scripts {
            settings.agents.insert(
                (*id).to_string(),
                AgentCommand {
                    command: "sh".into(),
                    args: vec!["-c".into(), (*script).to_string()],
                    env: BTreeMap::new(),
                },
            );
        }
        let ids: Vec<String> = scripts.iter().map(|(id, _)| (*id).to_string()).collect();
        SubprocessDispatcher::from_settings(&settings, &ids).unwrap()
    }

    fn dispatcher(script: &str) -> SubprocessDispatcher {
        shell_agents(&[("sh", script)])
    }

    fn request(root: &Path, timeout: Duration) -> AgentRequest {
        AgentRequest {
            agent: "sh".into(),
            address: "feature.login".parse().unwrap(),
            prompt: "# Task: CREATE feature.login\n".into(),
            root: root.to_path_buf(),
            scope: Vec::new(),
            timeout,
        }
    }

    fn git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let status = Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());
        dir
    }

    #[test]
    fn test_concurrent_agents_claim_only_their_files() {
        let dir = git_repo();
        let agents = shell_agents(&[
            ("slow", "sleep 0.5; echo 'fn login() {}' > login.rs"),
            ("fast", "sleep 0.1; echo 'fn export() {}' > export.rs"),
        ]);
        let scoped = |agent: &str, file: &str| AgentRequest {
            agent: agent.into(),
            scope: vec![file.to_string()],
            ..request(dir.path(), Duration::from_secs(10))
        };

        let (slow, fast) = std::thread::scope(|s| {
            let slow = s.spawn(|| agents.invoke(&scoped("slow", "login.rs")));
            let fast = s.spawn(|| agents.invoke(&scoped("fast", "export.rs")));
            (slow.join().unwrap().unwrap(), fast.join().unwrap().unwrap())
        });

        assert_eq!(slow.files, vec!["login.rs".to_string()]);
        assert_eq!(fast.files, vec!["export.rs".to_string()]);
    }

    #[test]
    fn test_agent_can_name_undeclared_files() {
        let dir = git_repo();
        std::fs::write(dir.path().join("stray.rs"), "").unwrap();
        let report = dispatcher("echo x > notes.md; echo x > extra.rs; echo 'wrote ./notes.md'")
            .invoke(&request(dir.path(), Duration::from_secs(10)))
            .unwrap();
        assert_eq!(report.files, vec!["notes.md".to_string()]);
    }

    #[test]
    fn test_prompt_goes_to_stdin_and_runs_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let report = dispatcher("cat > prompt.txt; echo done")
            .invoke(&request(dir.path(), Duration::from_secs(10)))
            .unwrap();

        assert_eq!(report.agent, "sh");
        assert_eq!(report.output.trim(), "done");
        let written = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
        assert!(written.starts_with("# Task: CREATE feature.login"));
    }

    #[test]
    fn test_failing_agent_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = dispatcher("echo 'model overloaded' >&2; exit 3")
            .invoke(&request(dir.path(), Duration::from_secs(10)))
            .unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_slow_agent_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let err = dispatcher("sleep 5")
            .invoke(&request(dir.path(), Duration::from_millis(300)))
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_unknown_agent_is_rejected() {
        let err = SubprocessDispatcher::from_settings(&Settings::default(), &["gpt-x".to_string()])
            .err()
            .unwrap();
        assert!(err.to_string().contains("claude-code"));
    }
}
