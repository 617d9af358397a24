// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{OrchestratorConfig, RawConfigFile};
use crate::errors::{Result, WpflowError};

impl TryFrom<RawConfigFile> for OrchestratorConfig {
    type Error = WpflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let global_timeout = validate_raw_config(&raw)?;
        Ok(OrchestratorConfig::new_unchecked(
            raw.orchestrator,
            global_timeout,
            raw.agents,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<Duration> {
    ensure_has_agents(cfg)?;
    validate_agents(cfg)?;
    validate_default_agent(cfg)?;
    validate_global_timeout(cfg)
}

fn ensure_has_agents(cfg: &RawConfigFile) -> Result<()> {
    if cfg.agents.is_empty() {
        return Err(WpflowError::ConfigError(
            "config must contain at least one [agents.<name>] section".to_string(),
        ));
    }
    if !cfg.agents.values().any(|agent| agent.enabled) {
        return Err(WpflowError::ConfigError(
            "at least one agent must be enabled".to_string(),
        ));
    }
    Ok(())
}

fn validate_agents(cfg: &RawConfigFile) -> Result<()> {
    for (name, agent) in cfg.agents.iter() {
        if agent.max_concurrent == 0 {
            return Err(WpflowError::ConfigError(format!(
                "[agents.{}].max_concurrent must be >= 1 (got 0)",
                name
            )));
        }
    }
    Ok(())
}

fn validate_default_agent(cfg: &RawConfigFile) -> Result<()> {
    let Some(name) = cfg.orchestrator.default_agent.as_deref() else {
        return Ok(());
    };

    match cfg.agents.get(name) {
        None => Err(WpflowError::ConfigError(format!(
            "[orchestrator].default_agent refers to unknown agent '{}'",
            name
        ))),
        Some(agent) if !agent.enabled => Err(WpflowError::ConfigError(format!(
            "[orchestrator].default_agent refers to disabled agent '{}'",
            name
        ))),
        Some(_) => Ok(()),
    }
}

fn validate_global_timeout(cfg: &RawConfigFile) -> Result<Duration> {
    let timeout = parse_duration(&cfg.orchestrator.global_timeout).map_err(|e| {
        WpflowError::ConfigError(format!("[orchestrator].global_timeout: {e}"))
    })?;

    if timeout.is_zero() {
        return Err(WpflowError::ConfigError(
            "[orchestrator].global_timeout must be greater than zero".to_string(),
        ));
    }

    Ok(timeout)
}

/// Parse strings like `"500ms"`, `"30s"`, `"15m"` or `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{AgentConfig, OrchestratorSection};
    use std::collections::BTreeMap;

    fn raw_with_agents(agents: &[(&str, AgentConfig)]) -> RawConfigFile {
        RawConfigFile {
            orchestrator: OrchestratorSection::default(),
            agents: agents
                .iter()
                .map(|(name, cfg)| (name.to_string(), cfg.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn parses_supported_duration_suffixes() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration(" 15m "), Ok(Duration::from_secs(900)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn oversized_durations_are_config_errors() {
        assert!(parse_duration("99999999999999999h").is_err());
        assert!(parse_duration("999999999999999999m").is_err());
        assert_eq!(
            parse_duration("18446744073709551615s"),
            Ok(Duration::from_secs(u64::MAX))
        );

        let mut raw = raw_with_agents(&[("claude", AgentConfig::default())]);
        raw.orchestrator.global_timeout = "99999999999999999h".to_string();
        let err = OrchestratorConfig::try_from(raw).unwrap_err();
        assert!(matches!(err, WpflowError::ConfigError(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn defaults_are_applied_to_a_minimal_config() {
        let cfg = OrchestratorConfig::try_from(raw_with_agents(&[(
            "claude",
            AgentConfig::default(),
        )]))
        .unwrap();

        assert_eq!(cfg.global_timeout, Duration::from_secs(7200));
        assert_eq!(cfg.max_review_cycles, 3);
        assert_eq!(cfg.agent("claude").map(|a| a.max_concurrent), Some(1));
        assert_eq!(cfg.resolve_agent(None), Some("claude"));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let agent = AgentConfig {
            max_concurrent: 0,
            ..AgentConfig::default()
        };
        let err = OrchestratorConfig::try_from(raw_with_agents(&[("claude", agent)]))
            .unwrap_err();
        assert!(err.to_string().contains("max_concurrent must be >= 1"));
    }

    #[test]
    fn rejects_missing_or_all_disabled_agents() {
        assert!(OrchestratorConfig::try_from(raw_with_agents(&[])).is_err());

        let disabled = AgentConfig {
            enabled: false,
            ..AgentConfig::default()
        };
        assert!(OrchestratorConfig::try_from(raw_with_agents(&[("a", disabled)])).is_err());
    }

    #[test]
    fn default_agent_must_exist_and_be_enabled() {
        let mut raw = raw_with_agents(&[
            ("claude", AgentConfig::default()),
            (
                "codex",
                AgentConfig {
                    enabled: false,
                    ..AgentConfig::default()
                },
            ),
        ]);

        raw.orchestrator.default_agent = Some("gemini".to_string());
        assert!(OrchestratorConfig::try_from(raw.clone()).is_err());

        raw.orchestrator.default_agent = Some("codex".to_string());
        assert!(OrchestratorConfig::try_from(raw.clone()).is_err());

        raw.orchestrator.default_agent = Some("claude".to_string());
        let cfg = OrchestratorConfig::try_from(raw).unwrap();
        assert_eq!(cfg.resolve_agent(None), Some("claude"));
        assert_eq!(cfg.resolve_agent(Some("codex")), Some("codex"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut raw = raw_with_agents(&[("claude", AgentConfig::default())]);
        raw.orchestrator.global_timeout = "0s".to_string();
        assert!(OrchestratorConfig::try_from(raw).is_err());
    }
}
