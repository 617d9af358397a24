// src/engine/mod.rs

//! Orchestration engine for wpflow.
//!
//! This module ties together:
//! - the scheduler (which units may run)
//! - the admission controller (how many per agent)
//! - the unit processor (drives one unit through its phases)
//! - the main loop that reacts to:
//!   - unit transitions published by processor tasks
//!   - processor tasks ending (normally or by panic)
//!   - shutdown signals and the global timeout
//!
//! Start-up checks live in [`plan`]. The pure scheduling state lives in
//! [`crate::dag::Scheduler`]; the async shell is implemented in [`runtime`].

use std::fmt;
use std::time::Duration;

use crate::state::{Run, UnitExecution, UnitStatus};

pub use crate::dag::{BlockedUnit, RunProgress};

pub mod plan;
pub mod processor;
pub mod runtime;

pub use plan::RunPlan;
pub use processor::{ProcessOutcome, UnitProcessor};
pub use runtime::Runtime;

/// Events flowing into the runtime from processor tasks and signal handlers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A unit changed state; carries the full record after the change.
    UnitTransitioned(UnitExecution),
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Runtime options for the main loop.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Upper bound for the whole run.
    pub global_timeout: Duration,
}

/// Called with a fresh snapshot on every loop iteration.
pub type ProgressCallback = Box<dyn FnMut(&RunProgress) + Send>;

/// Why the main loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every unit is COMPLETED or FAILED.
    Finished,
    /// Nothing runs and nothing can be dispatched, yet units remain.
    Deadlocked,
    TimedOut,
    Interrupted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Finished => "finished",
            RunOutcome::Deadlocked => "deadlocked",
            RunOutcome::TimedOut => "timed out",
            RunOutcome::Interrupted => "interrupted",
        })
    }
}

/// Summary returned by [`Runtime::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub feature_slug: String,
    pub outcome: RunOutcome,
    /// Final record of every unit, sorted by id.
    pub units: Vec<UnitExecution>,
    /// Non-terminal units, empty when the run finished.
    pub blocked: Vec<BlockedUnit>,
}

impl RunReport {
    pub fn from_run(run: &Run, outcome: RunOutcome, blocked: Vec<BlockedUnit>) -> Self {
        Self {
            run_id: run.run_id.clone(),
            feature_slug: run.feature_slug.clone(),
            outcome,
            units: run.units.values().cloned().collect(),
            blocked,
        }
    }

    pub fn unit(&self, unit_id: &str) -> Option<&UnitExecution> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }

    pub fn status_of(&self, unit_id: &str) -> Option<UnitStatus> {
        self.unit(unit_id).map(|u| u.status)
    }

    pub fn all_completed(&self) -> bool {
        self.units.iter().all(|u| u.status == UnitStatus::Completed)
    }

    pub fn failed_units(&self) -> impl Iterator<Item = &UnitExecution> {
        self.units.iter().filter(|u| u.status == UnitStatus::Failed)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} for {}: {}",
            self.run_id, self.feature_slug, self.outcome
        )?;
        for unit in &self.units {
            write!(f, "  {:<12} {}", unit.unit_id, unit.status)?;
            if unit.status == UnitStatus::Failed {
                if let Some(err) = unit.last_error.as_deref() {
                    write!(f, "  ({err})")?;
                }
            }
            writeln!(f)?;
        }
        if !self.blocked.is_empty() {
            writeln!(f, "blocked:")?;
            for b in &self.blocked {
                writeln!(f, "  {b}")?;
            }
        }
        Ok(())
    }
}
