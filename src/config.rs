//! Project settings (`driftless.toml`)
//!
//! Every section is optional; a missing file means built-in defaults.
//!
//! ```toml
//! [apply]
//! mode = "hybrid"
//! workers = 2
//! timeout_secs = 600
//! verify = "git_diff"
//! agents = ["claude-code", "codex"]
//!
//! [agents.claude-code]
//! command = "claude"
//! args = ["--print", "--model", "opus"]
//!
//! [market]
//! base_url = "https://api.execution.market"
//! api_key_env = "EXECUTION_MARKET_API_KEY"
//! bounty = 25.0
//! ```

use anyhow::{Context, Result};
use converge::{ExecutionMode, VerifyLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub apply: ApplySettings,
    /// Agent commands by id, merged over the built-in agents
    pub agents: BTreeMap<String, AgentCommand>,
    pub market: MarketSettings,
}

/// Defaults for `driftless apply`; command-line flags override them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApplySettings {
    pub mode: ExecutionMode,
    pub workers: usize,
    /// Per-attempt agent timeout
    pub timeout_secs: u64,
    pub verify: VerifyLevel,
    /// Agent chain for auto and hybrid modes, tried in order
    pub agents: Vec<String>,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Interactive,
            workers: 1,
            timeout_secs: 300,
            verify: VerifyLevel::Basic,
            agents: vec!["claude-code".to_string()],
        }
    }
}

/// How to launch an agent. The prompt is written to its stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl AgentCommand {
    fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarketSettings {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub bounty: f64,
    pub poll_secs: u64,
    pub timeout_secs: u64,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.execution.market".to_string(),
            api_key_env: "EXECUTION_MARKET_API_KEY".to_string(),
            bounty: converge::executor::market::DEFAULT_BOUNTY,
            poll_secs: 30,
            timeout_secs: 3600,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when there is no file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let settings: Self =
            toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Look up an agent: configured entries first, then the built-ins
    pub fn agent(&self, id: &str) -> Option<AgentCommand> {
        self.agents.get(id).cloned().or_else(|| builtin_agent(id))
    }

    /// Ids usable in an agent chain
    pub fn known_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = BUILTIN_AGENTS.iter().map(|s| (*s).to_string()).collect();
        for id in self.agents.keys() {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

const BUILTIN_AGENTS: &[&str] = &["claude-code", "codex"];

fn builtin_agent(id: &str) -> Option<AgentCommand> {
    match id {
        "claude-code" => Some(AgentCommand::new("claude", &["--print", "--model", "sonnet"])),
        "codex" => Some(AgentCommand::new("codex", &["--quiet"])),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
