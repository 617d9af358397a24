// src/dag/scheduler_step.rs

//! Result and report types produced by the scheduler.

use std::fmt;

use crate::state::UnitStatus;
use crate::types::UnitId;

/// Structured result of folding one unit update into the scheduler.
///
/// Useful for tests that step the scheduler by hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Units promoted PENDING -> READY by this step.
    pub newly_ready: Vec<UnitId>,
    /// Units that entered FAILED in this step, the updated unit first and
    /// then every cascaded dependent.
    pub newly_failed: Vec<UnitId>,
    /// Whether every unit is now terminal.
    pub run_just_finished: bool,
}

/// A unit the scheduler may hand to the processor, paired with its agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchCandidate {
    pub unit_id: UnitId,
    pub agent: String,
}

/// A non-terminal unit left behind by a halted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedUnit {
    pub unit_id: UnitId,
    pub status: UnitStatus,
    /// Dependencies that have not completed.
    pub waiting_on: Vec<UnitId>,
}

impl fmt::Display for BlockedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.unit_id, self.status)?;
        if !self.waiting_on.is_empty() {
            write!(f, " waiting on {}", self.waiting_on.join(", "))?;
        }
        Ok(())
    }
}

/// Snapshot handed to the progress callback on every loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Units in IMPLEMENTATION or REVIEW.
    pub running: usize,
    /// Units in PENDING or READY.
    pub waiting: usize,
}
