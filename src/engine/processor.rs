// src/engine/processor.rs

//! Drives one work unit through implementation and review.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::RunEvent;
use crate::errors::{Result, WpflowError};
use crate::exec::{AgentBackend, UnitContext};
use crate::lanes::LaneStore;
use crate::state::{UnitExecution, UnitStatus};
use crate::types::{Lane, ReviewOutcome};

/// Final record of a processed unit, returned when its task ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub execution: UnitExecution,
}

/// Runs the two phases of a unit against an [`AgentBackend`].
///
/// The processor works on its own copy of the unit's record. After every
/// transition it publishes a snapshot as [`RunEvent::UnitTransitioned`] so
/// the runtime can fold and persist it. Lane writes always happen before the
/// matching status change.
///
/// Errors from either phase (or from the lane store) end the unit in FAILED;
/// they never propagate out of [`process`](Self::process).
///
/// Once [`request_stop`](Self::request_stop) is called, a unit finishes the
/// phase it is in and stops at the next phase boundary. It keeps its status
/// so a later run resumes it.
#[derive(Clone)]
pub struct UnitProcessor {
    agents: Arc<dyn AgentBackend>,
    lanes: Arc<dyn LaneStore>,
    max_review_cycles: u32,
    events: mpsc::Sender<RunEvent>,
    stop: Arc<AtomicBool>,
}

impl fmt::Debug for UnitProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitProcessor")
            .field("max_review_cycles", &self.max_review_cycles)
            .field("stop_requested", &self.stop_requested())
            .finish_non_exhaustive()
    }
}

impl UnitProcessor {
    pub fn new(
        agents: Arc<dyn AgentBackend>,
        lanes: Arc<dyn LaneStore>,
        max_review_cycles: u32,
        events: mpsc::Sender<RunEvent>,
    ) -> Self {
        Self {
            agents,
            lanes,
            max_review_cycles,
            events,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask every unit processed by this processor (and its clones) to stop
    /// at the next phase boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// True when the unit should not start another phase.
    fn halt_before_phase(&self, exec: &UnitExecution, phase: &str) -> bool {
        let halt = self.stop_requested();
        if halt {
            info!(unit = %exec.unit_id, status = %exec.status, phase, "stop requested; unit left for resume");
        }
        halt
    }

    /// Process `execution` until it is COMPLETED, FAILED or back in PENDING
    /// after a rejected review.
    ///
    /// Units found in IMPLEMENTATION or REVIEW are resumed: an implementation
    /// that never completed is run again, otherwise the unit goes straight to
    /// review.
    pub async fn process(&self, mut execution: UnitExecution, ctx: UnitContext) -> ProcessOutcome {
        let unit_id = execution.unit_id.clone();
        debug!(unit = %unit_id, status = %execution.status, agent = %ctx.agent, "processing unit");

        if let Err(err) = self.drive(&mut execution, &ctx).await {
            warn!(unit = %unit_id, error = %err, "unit failed");
            match execution.fail(err.to_string()) {
                Ok(()) => self.publish(&execution).await,
                Err(e) => warn!(unit = %unit_id, error = %e, "could not mark unit failed"),
            }
        }

        ProcessOutcome { execution }
    }

    async fn drive(&self, exec: &mut UnitExecution, ctx: &UnitContext) -> Result<()> {
        match exec.status {
            UnitStatus::Pending | UnitStatus::Ready => {
                if self.halt_before_phase(exec, "implementation") {
                    return Ok(());
                }
                self.implement(exec, ctx).await?;
                if self.halt_before_phase(exec, "review") {
                    return Ok(());
                }
                self.review(exec, ctx).await
            }
            UnitStatus::Implementation => {
                if exec.implementation_completed.is_none() {
                    if self.halt_before_phase(exec, "implementation") {
                        return Ok(());
                    }
                    info!(unit = %exec.unit_id, "resuming interrupted implementation");
                    self.run_implementation(exec, ctx).await?;
                } else {
                    info!(unit = %exec.unit_id, "implementation already done; resuming at review");
                }
                if self.halt_before_phase(exec, "review") {
                    return Ok(());
                }
                self.review(exec, ctx).await
            }
            UnitStatus::Review => {
                if self.halt_before_phase(exec, "review") {
                    return Ok(());
                }
                info!(unit = %exec.unit_id, "resuming interrupted review");
                self.run_review(exec, ctx).await
            }
            UnitStatus::Completed | UnitStatus::Failed => {
                warn!(unit = %exec.unit_id, status = %exec.status, "terminal unit dispatched; nothing to do");
                Ok(())
            }
        }
    }

    /// PENDING/READY -> IMPLEMENTATION, then run the phase.
    async fn implement(&self, exec: &mut UnitExecution, ctx: &UnitContext) -> Result<()> {
        self.lanes.transition_lane(&exec.unit_id, Lane::Doing)?;
        exec.begin_implementation(Utc::now())?;
        self.publish(exec).await;

        self.run_implementation(exec, ctx).await
    }

    async fn run_implementation(&self, exec: &mut UnitExecution, ctx: &UnitContext) -> Result<()> {
        self.agents.run_implementation(ctx).await?;
        exec.complete_implementation(Utc::now())?;
        self.publish(exec).await;
        Ok(())
    }

    /// IMPLEMENTATION -> REVIEW, then run the phase.
    async fn review(&self, exec: &mut UnitExecution, ctx: &UnitContext) -> Result<()> {
        self.lanes.transition_lane(&exec.unit_id, Lane::ForReview)?;
        exec.begin_review(Utc::now())?;
        self.publish(exec).await;

        self.run_review(exec, ctx).await
    }

    async fn run_review(&self, exec: &mut UnitExecution, ctx: &UnitContext) -> Result<()> {
        match self.agents.run_review(ctx).await? {
            ReviewOutcome::Approved => {
                self.lanes.transition_lane(&exec.unit_id, Lane::Done)?;
                exec.approve(Utc::now())?;
                info!(unit = %exec.unit_id, "review approved");
            }
            ReviewOutcome::Rejected { feedback } => {
                if let Some(feedback) = feedback.as_deref() {
                    self.lanes.record_review_feedback(&exec.unit_id, feedback)?;
                }

                let rejections = exec.review_cycles + 1;
                if rejections > self.max_review_cycles {
                    return Err(WpflowError::StateError(format!(
                        "review rejected {} times (limit {})",
                        rejections, self.max_review_cycles
                    )));
                }

                self.lanes.transition_lane(&exec.unit_id, Lane::Planned)?;
                exec.reject()?;
                info!(unit = %exec.unit_id, cycle = exec.review_cycles, "review rejected; unit back in backlog");
            }
        }
        self.publish(exec).await;
        Ok(())
    }

    async fn publish(&self, exec: &UnitExecution) {
        if self
            .events
            .send(RunEvent::UnitTransitioned(exec.clone()))
            .await
            .is_err()
        {
            debug!(unit = %exec.unit_id, "runtime gone; dropping unit update");
        }
    }
}
