// src/exec/command.rs

//! Agent backend that runs the configured shell commands.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, OrchestratorConfig};
use crate::errors::{Result, WpflowError};
use crate::exec::backend::{AgentBackend, BoxFuture, UnitContext};
use crate::types::ReviewOutcome;

/// Review exit code meaning "changes requested".
pub const REVIEW_REJECTED_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Implementation,
    Review,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Implementation => "implementation",
            Phase::Review => "review",
        }
    }
}

#[derive(Debug)]
struct PhaseOutput {
    code: i32,
    stdout: String,
}

/// Production backend: each phase is a `sh -c` invocation of the agent's
/// `implement_cmd` / `review_cmd`.
///
/// The child is killed if the unit task is dropped (e.g. on global timeout).
#[derive(Debug, Clone)]
pub struct CommandAgentBackend {
    agents: BTreeMap<String, AgentConfig>,
    working_dir: PathBuf,
}

impl CommandAgentBackend {
    pub fn new(config: &OrchestratorConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            agents: config.agents.clone(),
            working_dir: working_dir.into(),
        }
    }

    /// Check that every agent in use has both commands configured.
    pub fn check_agents<'a>(&self, agents: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let mut problems = Vec::new();
        for name in agents {
            match self.agents.get(name) {
                None => problems.push(format!("agent '{}' is not configured", name)),
                Some(agent) => {
                    if agent.implement_cmd.is_none() {
                        problems.push(format!("agent '{}' has no implement_cmd", name));
                    }
                    if agent.review_cmd.is_none() {
                        problems.push(format!("agent '{}' has no review_cmd", name));
                    }
                }
            }
        }
        problems.sort();
        problems.dedup();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WpflowError::ConfigError(problems.join("; ")))
        }
    }

    fn command_for(&self, ctx: &UnitContext, phase: Phase) -> anyhow::Result<String> {
        let agent = self
            .agents
            .get(&ctx.agent)
            .ok_or_else(|| anyhow!("agent '{}' is not configured", ctx.agent))?;

        let template = match phase {
            Phase::Implementation => agent.implement_cmd.as_deref(),
            Phase::Review => agent.review_cmd.as_deref(),
        }
        .ok_or_else(|| anyhow!("agent '{}' has no {} command", ctx.agent, phase.as_str()))?;

        Ok(template
            .replace("{unit}", &ctx.unit_id)
            .replace("{feature}", &ctx.feature_slug))
    }

    async fn run_phase(&self, ctx: &UnitContext, phase: Phase) -> anyhow::Result<PhaseOutput> {
        let cmd_line = self.command_for(ctx, phase)?;

        info!(
            unit = %ctx.unit_id,
            agent = %ctx.agent,
            phase = phase.as_str(),
            cmd = %cmd_line,
            "starting agent process"
        );

        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&cmd_line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&cmd_line);
            c
        };

        cmd.current_dir(&self.working_dir)
            .env("WPFLOW_UNIT", &ctx.unit_id)
            .env("WPFLOW_FEATURE", &ctx.feature_slug)
            .env("WPFLOW_AGENT", &ctx.agent)
            .env("WPFLOW_PHASE", phase.as_str())
            .env("WPFLOW_REVIEW_CYCLE", ctx.review_cycle.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!("spawning {} process for unit '{}'", phase.as_str(), ctx.unit_id)
        })?;

        // Always consume stderr so buffers don't fill; log at debug.
        if let Some(stderr) = child.stderr.take() {
            let unit = ctx.unit_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(unit = %unit, "stderr: {}", line);
                }
            });
        }

        let output = child.wait_with_output().await.with_context(|| {
            format!("waiting for {} process of unit '{}'", phase.as_str(), ctx.unit_id)
        })?;

        let code = output.status.code().unwrap_or(-1);
        info!(
            unit = %ctx.unit_id,
            phase = phase.as_str(),
            exit_code = code,
            "agent process exited"
        );

        Ok(PhaseOutput {
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

impl AgentBackend for CommandAgentBackend {
    fn run_implementation<'a>(&'a self, ctx: &'a UnitContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let output = self.run_phase(ctx, Phase::Implementation).await?;
            if output.code != 0 {
                return Err(WpflowError::Other(anyhow!(
                    "implementation command for unit '{}' exited with code {}",
                    ctx.unit_id,
                    output.code
                )));
            }
            Ok(())
        })
    }

    fn run_review<'a>(&'a self, ctx: &'a UnitContext) -> BoxFuture<'a, Result<ReviewOutcome>> {
        Box::pin(async move {
            let output = self.run_phase(ctx, Phase::Review).await?;
            match output.code {
                0 => Ok(ReviewOutcome::Approved),
                REVIEW_REJECTED_EXIT_CODE => {
                    let feedback = output.stdout.trim();
                    if feedback.is_empty() {
                        warn!(unit = %ctx.unit_id, "review rejected without feedback");
                    }
                    Ok(ReviewOutcome::Rejected {
                        feedback: (!feedback.is_empty()).then(|| feedback.to_string()),
                    })
                }
                code => Err(WpflowError::Other(anyhow!(
                    "review command for unit '{}' exited with code {}",
                    ctx.unit_id,
                    code
                ))),
            }
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{OrchestratorSection, RawConfigFile};

    fn backend(implement: &str, review: &str) -> CommandAgentBackend {
        let mut agents = BTreeMap::new();
        agents.insert(
            "shell".to_string(),
            AgentConfig {
                implement_cmd: Some(implement.to_string()),
                review_cmd: Some(review.to_string()),
                ..AgentConfig::default()
            },
        );
        let cfg = OrchestratorConfig::try_from(RawConfigFile {
            orchestrator: OrchestratorSection::default(),
            agents,
        })
        .unwrap();
        CommandAgentBackend::new(&cfg, std::env::temp_dir())
    }

    fn ctx() -> UnitContext {
        UnitContext {
            unit_id: "WP01".to_string(),
            feature_slug: "001-checkout".to_string(),
            agent: "shell".to_string(),
            review_cycle: 0,
        }
    }

    #[tokio::test]
    async fn implementation_success_and_failure_follow_exit_code() {
        let ok = backend("test \"$WPFLOW_UNIT\" = {unit}", "true");
        assert!(ok.run_implementation(&ctx()).await.is_ok());

        let failing = backend("exit 3", "true");
        let err = failing.run_implementation(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("exited with code 3"));
    }

    #[tokio::test]
    async fn review_exit_codes_map_to_outcomes() {
        let approve = backend("true", "exit 0");
        assert_eq!(approve.run_review(&ctx()).await.unwrap(), ReviewOutcome::Approved);

        let reject = backend("true", "echo 'add tests for {feature}'; exit 1");
        assert_eq!(
            reject.run_review(&ctx()).await.unwrap(),
            ReviewOutcome::Rejected {
                feedback: Some("add tests for 001-checkout".to_string())
            }
        );

        let broken = backend("true", "exit 127");
        assert!(broken.run_review(&ctx()).await.is_err());
    }

    #[test]
    fn check_agents_reports_missing_commands() {
        let mut b = backend("true", "true");
        b.agents.insert("bare".to_string(), AgentConfig::default());

        assert!(b.check_agents(["shell"]).is_ok());
        let err = b.check_agents(["shell", "bare", "ghost"]).unwrap_err().to_string();
        assert!(err.contains("'bare' has no implement_cmd"));
        assert!(err.contains("'bare' has no review_cmd"));
        assert!(err.contains("'ghost' is not configured"));
    }
}
