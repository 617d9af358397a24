// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [orchestrator]
/// global_timeout = "2h"
/// max_review_cycles = 3
/// default_agent = "claude"
///
/// [agents.claude]
/// max_concurrent = 2
/// implement_cmd = "claude-implement {unit}"
/// review_cmd = "claude-review {unit}"
///
/// [agents.codex]
/// enabled = false
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    /// All agents from `[agents.<name>]`.
    #[serde(default)]
    pub agents: BTreeMap<String, AgentConfig>,
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// Upper bound for the whole run (`ms`, `s`, `m` or `h` suffix).
    #[serde(default = "default_global_timeout")]
    pub global_timeout: String,

    /// Kept for compatibility with existing configs. A unit is marked failed
    /// on its first error regardless of this value.
    #[serde(default)]
    pub max_retries: u32,

    /// How many review rejections a unit may accumulate before it fails.
    #[serde(default = "default_max_review_cycles")]
    pub max_review_cycles: u32,

    /// Agent used for units that do not name one.
    #[serde(default)]
    pub default_agent: Option<String>,

    /// Control directory, relative to the project root.
    #[serde(default = "default_control_dir")]
    pub control_dir: PathBuf,
}

fn default_global_timeout() -> String {
    "2h".to_string()
}

fn default_max_review_cycles() -> u32 {
    3
}

fn default_control_dir() -> PathBuf {
    PathBuf::from(".wpflow")
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            global_timeout: default_global_timeout(),
            max_retries: 0,
            max_review_cycles: default_max_review_cycles(),
            default_agent: None,
            control_dir: default_control_dir(),
        }
    }
}

/// `[agents.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Ceiling on units this agent works on at once. Must be >= 1.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Shell command for the implementation phase. `{unit}` and `{feature}`
    /// are substituted before running.
    #[serde(default)]
    pub implement_cmd: Option<String>,

    /// Shell command for the review phase. Exit code 0 approves, 1 rejects
    /// (stdout becomes the feedback), anything else is an error.
    #[serde(default)]
    pub review_cmd: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_concurrent: default_max_concurrent(),
            implement_cmd: None,
            review_cmd: None,
        }
    }
}

/// Validated configuration consumed by the scheduler.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `config::validate`),
/// so holding one means the agent table and durations are sane.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub global_timeout: Duration,
    pub max_retries: u32,
    pub max_review_cycles: u32,
    pub default_agent: Option<String>,
    pub control_dir: PathBuf,
    pub agents: BTreeMap<String, AgentConfig>,
}

impl OrchestratorConfig {
    pub(crate) fn new_unchecked(
        orchestrator: OrchestratorSection,
        global_timeout: Duration,
        agents: BTreeMap<String, AgentConfig>,
    ) -> Self {
        Self {
            global_timeout,
            max_retries: orchestrator.max_retries,
            max_review_cycles: orchestrator.max_review_cycles,
            default_agent: orchestrator.default_agent,
            control_dir: orchestrator.control_dir,
            agents,
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }

    /// Pick the agent for a unit: the unit's own choice, then
    /// `default_agent`, then the first enabled agent by name.
    pub fn resolve_agent<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        if let Some(name) = requested {
            return Some(name);
        }
        if let Some(name) = self.default_agent.as_deref() {
            return Some(name);
        }
        self.agents
            .iter()
            .find(|(_, agent)| agent.enabled)
            .map(|(name, _)| name.as_str())
    }
}
