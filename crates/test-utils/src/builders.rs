#![allow(dead_code)]

use std::collections::BTreeMap;

use wpflow::config::{AgentConfig, OrchestratorConfig, OrchestratorSection, RawConfigFile};
use wpflow::units::UnitMetadata;

/// Builder for `OrchestratorConfig` to simplify test setup.
pub struct ConfigBuilder {
    config: RawConfigFile,
}

impl ConfigBuilder {
    /// No agents yet; add at least one before `build`.
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                orchestrator: OrchestratorSection::default(),
                agents: BTreeMap::new(),
            },
        }
    }

    pub fn with_agent(mut self, name: &str, max_concurrent: usize) -> Self {
        self.config.agents.insert(
            name.to_string(),
            AgentConfig {
                max_concurrent,
                ..AgentConfig::default()
            },
        );
        self
    }

    pub fn with_disabled_agent(mut self, name: &str) -> Self {
        self.config.agents.insert(
            name.to_string(),
            AgentConfig {
                enabled: false,
                ..AgentConfig::default()
            },
        );
        self
    }

    pub fn with_default_agent(mut self, name: &str) -> Self {
        self.config.orchestrator.default_agent = Some(name.to_string());
        self
    }

    pub fn with_max_review_cycles(mut self, cycles: u32) -> Self {
        self.config.orchestrator.max_review_cycles = cycles;
        self
    }

    pub fn with_global_timeout(mut self, timeout: &str) -> Self {
        self.config.orchestrator.global_timeout = timeout.to_string();
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        OrchestratorConfig::try_from(self.config)
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One unit with the given dependencies and no explicit agent.
pub fn unit(id: &str, deps: &[&str]) -> UnitMetadata {
    UnitMetadata::new(id, deps)
}

/// One unit pinned to `agent`.
pub fn unit_on(id: &str, deps: &[&str], agent: &str) -> UnitMetadata {
    UnitMetadata {
        agent: Some(agent.to_string()),
        ..UnitMetadata::new(id, deps)
    }
}

/// The two-unit chain `WP01 <- WP02` used by most scenarios.
pub fn chain_of_two() -> Vec<UnitMetadata> {
    vec![unit("WP01", &[]), unit("WP02", &["WP01"])]
}
