//! Verification gates for implemented outcomes.
//!
//! Levels nest: `basic` checks files exist and are non-empty, `git_diff` adds
//! a changed-in-git check per file, `full` adds an inference pass over the
//! declared symbols.

use crate::error::{ConvergeError, Result};
use crate::inference::InferenceProvider;
use crate::model::{Address, SymbolPresence, SymbolStatus};
use crate::spec::ResourceSpec;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::Arc;

/// How much evidence an implemented outcome needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    #[default]
    Basic,
    GitDiff,
    Full,
}

impl VerifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::GitDiff => "git_diff",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for VerifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerifyLevel {
    type Err = ConvergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basic" => Ok(Self::Basic),
            "git_diff" | "git-diff" => Ok(Self::GitDiff),
            "full" => Ok(Self::Full),
            other => Err(ConvergeError::Spec {
                message: format!("unknown verification level '{other}' (basic, git_diff, full)"),
            }),
        }
    }
}

/// Result of verifying one resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verification {
    pub passed: bool,
    pub files_checked: Vec<String>,
    pub problems: Vec<String>,
    /// Symbols to record for a passed outcome: located by inference at
    /// `full`, otherwise the declared names taken on trust
    pub symbols: BTreeMap<String, SymbolStatus>,
}

impl Verification {
    pub fn reason(&self) -> String {
        self.problems.join("; ")
    }
}

/// Checks outcomes against the configured level
#[derive(Clone)]
pub struct Verifier {
    level: VerifyLevel,
    root: PathBuf,
    baseline: Option<String>,
    inference: Option<Arc<dyn InferenceProvider>>,
}

impl Verifier {
    pub fn new(level: VerifyLevel, root: impl Into<PathBuf>) -> Self {
        Self {
            level,
            root: root.into(),
            baseline: None,
            inference: None,
        }
    }

    /// Git revision that committed changes are compared against
    pub fn with_baseline(mut self, revision: impl Into<String>) -> Self {
        self.baseline = Some(revision.into());
        self
    }

    pub fn with_inference(mut self, provider: Arc<dyn InferenceProvider>) -> Self {
        self.inference = Some(provider);
        self
    }

    pub fn level(&self) -> VerifyLevel {
        self.level
    }

    /// Verify declared files plus `outcome_files` at the configured level.
    ///
    /// A resource with no files at all passes `basic`: there is nothing to
    /// check, and the outcome is trusted.
    pub fn verify(
        &self,
        address: &Address,
        resource: &ResourceSpec,
        outcome_files: &[String],
    ) -> Verification {
        let mut files: Vec<String> = Vec::new();
        for file in resource.files.iter().chain(outcome_files) {
            if !files.contains(file) {
                files.push(file.clone());
            }
        }

        let mut problems = Vec::new();
        for file in &files {
            let non_empty = std::fs::metadata(self.root.join(file)).is_ok_and(|m| m.len() > 0);
            if !non_empty {
                problems.push(format!("file missing or empty: {file}"));
            }
        }

        if self.level >= VerifyLevel::GitDiff {
            for file in &files {
                match self.changed_in_git(file) {
                    Ok(true) => {}
                    Ok(false) => problems.push(format!("no git changes for {file}")),
                    Err(e) => problems.push(format!("git check failed for {file}: {e:#}")),
                }
            }
        }

        let mut symbols = BTreeMap::new();
        if self.level >= VerifyLevel::Full && !resource.symbols.is_empty() {
            // scan what the outcome touched, not only what the spec names
            let mut scanned = resource.clone();
            scanned.files.clone_from(&files);
            match &self.inference {
                None => problems.push("no inference provider for full verification".to_string()),
                Some(provider) => match provider.infer(address, &scanned, &self.root) {
                    Ok(inference) => {
                        for symbol in inference.missing_symbols(&resource.symbols) {
                            problems.push(format!("symbol not found: {symbol}"));
                        }
                        symbols = inference.symbols;
                    }
                    Err(e) => problems.push(format!("inference failed: {e:#}")),
                },
            }
        }

        let passed = problems.is_empty();
        if passed {
            for name in &resource.symbols {
                symbols.entry(name.clone()).or_insert_with(declared_symbol);
            }
        } else {
            log::debug!("Verification ({}) failed for {address}: {problems:?}", self.level);
        }
        Verification {
            passed,
            files_checked: files,
            problems,
            symbols,
        }
    }

    /// Uncommitted changes, or changes since the baseline revision
    fn changed_in_git(&self, file: &str) -> anyhow::Result<bool> {
        let status = git_capture(&self.root, &["status", "--porcelain", "--untracked-files=all", "--", file])?;
        if !status.is_empty() {
            return Ok(true);
        }
        if let Some(baseline) = &self.baseline {
            let diff = git_capture(&self.root, &["diff", "--name-only", baseline.as_str(), "--", file])?;
            return Ok(!diff.is_empty());
        }
        Ok(false)
    }
}

/// A declared symbol recorded without a located definition
fn declared_symbol() -> SymbolStatus {
    SymbolStatus {
        kind: "declared".to_string(),
        status: SymbolPresence::Implemented,
        location: None,
    }
}

/// Run git in `root` and capture trimmed stdout
fn git_capture(root: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("Failed to execute: git {}", args.join(" ")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("git {} failed: {}", args[0], stderr.trim())
    }
}
