// src/state/model.rs

//! Per-unit execution state machine and the aggregate run record.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{Result, WpflowError};
use crate::types::UnitId;

/// Scheduler-side status of a work unit.
///
/// Unknown strings are rejected when a state file is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Waiting on at least one dependency.
    Pending,
    /// Dependencies satisfied; waiting for an admission slot.
    Ready,
    Implementation,
    Review,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Ready => "ready",
            UnitStatus::Implementation => "implementation",
            UnitStatus::Review => "review",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Completed | UnitStatus::Failed)
    }

    /// Not yet dispatched: still in the backlog.
    pub fn is_waiting(self) -> bool {
        matches!(self, UnitStatus::Pending | UnitStatus::Ready)
    }

    pub fn is_in_progress(self) -> bool {
        matches!(self, UnitStatus::Implementation | UnitStatus::Review)
    }

    /// Whether the state machine allows moving from `self` to `to`.
    pub fn can_transition_to(self, to: UnitStatus) -> bool {
        use UnitStatus::*;
        match (self, to) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Ready) => true,
            (Pending | Ready, Implementation) => true,
            (Implementation, Review) => true,
            (Review, Completed) => true,
            (Review, Pending) => true,
            (Pending | Ready | Implementation | Review, _) => false,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution record of one work unit within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitExecution {
    pub unit_id: UnitId,
    pub status: UnitStatus,
    #[serde(default)]
    pub implementation_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub implementation_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub review_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Number of review rejections so far.
    #[serde(default)]
    pub review_cycles: u32,
}

impl UnitExecution {
    pub fn new(unit_id: impl Into<UnitId>) -> Self {
        Self {
            unit_id: unit_id.into(),
            status: UnitStatus::Pending,
            implementation_started: None,
            implementation_completed: None,
            review_started: None,
            review_completed: None,
            last_error: None,
            review_cycles: 0,
        }
    }

    fn transition(&mut self, to: UnitStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(WpflowError::StateError(format!(
                "illegal transition {} -> {} for unit {}",
                self.status, to, self.unit_id
            )));
        }
        self.status = to;
        Ok(())
    }

    /// PENDING -> READY.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.transition(UnitStatus::Ready)
    }

    /// PENDING/READY -> IMPLEMENTATION.
    ///
    /// Starting a new implementation pass (e.g. after a rejection) clears the
    /// stamps of the previous pass. Resume re-runs the implementation only
    /// when `implementation_completed` is unset, so a stale stamp from the
    /// rejected pass would send a crashed rework pass straight to review.
    pub fn begin_implementation(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(UnitStatus::Implementation)?;
        self.implementation_started = Some(now);
        self.implementation_completed = None;
        self.review_started = None;
        self.review_completed = None;
        Ok(())
    }

    /// Stamp the end of the implementation phase. Status stays
    /// IMPLEMENTATION until the review begins.
    pub fn complete_implementation(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != UnitStatus::Implementation || self.implementation_started.is_none() {
            return Err(WpflowError::StateError(format!(
                "unit {} cannot complete implementation from status {}",
                self.unit_id, self.status
            )));
        }
        self.implementation_completed = Some(now);
        Ok(())
    }

    /// IMPLEMENTATION -> REVIEW. Requires a completed implementation.
    pub fn begin_review(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.implementation_completed.is_none() {
            return Err(WpflowError::StateError(format!(
                "unit {} cannot enter review before implementation completes",
                self.unit_id
            )));
        }
        self.transition(UnitStatus::Review)?;
        self.review_started = Some(now);
        Ok(())
    }

    /// REVIEW -> COMPLETED.
    pub fn approve(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(UnitStatus::Completed)?;
        self.review_completed = Some(now);
        Ok(())
    }

    /// REVIEW -> PENDING. Timestamps of the rejected pass are kept.
    pub fn reject(&mut self) -> Result<()> {
        self.transition(UnitStatus::Pending)?;
        self.review_cycles += 1;
        Ok(())
    }

    /// Any non-terminal status -> FAILED with a human readable cause.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let reason = if reason.trim().is_empty() {
            "unknown error".to_string()
        } else {
            reason
        };
        self.transition(UnitStatus::Failed)?;
        self.last_error = Some(reason);
        Ok(())
    }

    /// Structural invariants of a single record.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.implementation_completed.is_some() && self.implementation_started.is_none() {
            problems.push(format!(
                "unit {}: implementation_completed without implementation_started",
                self.unit_id
            ));
        }
        if self.review_completed.is_some() && self.review_started.is_none() {
            problems.push(format!(
                "unit {}: review_completed without review_started",
                self.unit_id
            ));
        }
        if self.status == UnitStatus::Failed && self.last_error.is_none() {
            problems.push(format!("unit {}: failed without last_error", self.unit_id));
        }
        problems
    }
}

/// Aggregate record of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub feature_slug: String,
    pub started_at: DateTime<Utc>,
    pub units_total: usize,
    pub units_completed: usize,
    pub units: BTreeMap<UnitId, UnitExecution>,
}

impl Run {
    /// Start a fresh run with every unit PENDING.
    pub fn new(feature_slug: impl Into<String>, unit_ids: impl IntoIterator<Item = UnitId>) -> Self {
        let units: BTreeMap<UnitId, UnitExecution> = unit_ids
            .into_iter()
            .map(|id| (id.clone(), UnitExecution::new(id)))
            .collect();

        Self {
            run_id: Uuid::new_v4().to_string(),
            feature_slug: feature_slug.into(),
            started_at: Utc::now(),
            units_total: units.len(),
            units_completed: 0,
            units,
        }
    }

    pub fn unit(&self, id: &str) -> Option<&UnitExecution> {
        self.units.get(id)
    }

    pub(crate) fn unit_mut(&mut self, id: &str) -> Option<&mut UnitExecution> {
        self.units.get_mut(id)
    }

    pub fn status_of(&self, id: &str) -> Option<UnitStatus> {
        self.units.get(id).map(|u| u.status)
    }

    /// Replace a unit's record with a newer snapshot of it.
    ///
    /// `units_completed` is incremented when the unit enters COMPLETED.
    /// Snapshots for terminal units are ignored.
    pub fn apply(&mut self, update: UnitExecution) -> Result<()> {
        let current = self
            .units
            .get_mut(&update.unit_id)
            .ok_or_else(|| WpflowError::UnitNotFound(update.unit_id.clone()))?;

        if current.status.is_terminal() {
            if *current != update {
                warn!(
                    unit = %update.unit_id,
                    status = %current.status,
                    incoming = %update.status,
                    "ignoring update for unit already in a terminal state"
                );
            }
            return Ok(());
        }

        let newly_completed = update.status == UnitStatus::Completed;
        *current = update;
        if newly_completed {
            self.units_completed += 1;
        }
        Ok(())
    }

    pub fn all_terminal(&self) -> bool {
        self.units.values().all(|u| u.status.is_terminal())
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.values().filter(|u| u.status == status).count()
    }

    pub fn recompute_totals(&mut self) {
        self.units_total = self.units.len();
        self.units_completed = self.count(UnitStatus::Completed);
    }

    /// Align a resumed run with the units currently declared for the
    /// feature: new units are added as PENDING, vanished ones are dropped.
    pub fn reconcile(&mut self, unit_ids: &BTreeSet<UnitId>) {
        self.units.retain(|id, _| {
            let keep = unit_ids.contains(id);
            if !keep {
                warn!(unit = %id, "unit no longer declared; dropping it from the resumed run");
            }
            keep
        });

        for id in unit_ids {
            self.units
                .entry(id.clone())
                .or_insert_with(|| UnitExecution::new(id.clone()));
        }

        self.recompute_totals();
    }

    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems: Vec<String> = self
            .units
            .iter()
            .flat_map(|(key, unit)| {
                let mut p = unit.invariant_violations();
                if *key != unit.unit_id {
                    p.push(format!("unit stored under '{}' is named '{}'", key, unit.unit_id));
                }
                p
            })
            .collect();

        if self.units_total != self.units.len() {
            problems.push(format!(
                "units_total is {} but {} units are recorded",
                self.units_total,
                self.units.len()
            ));
        }
        problems
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {} for {} (started {}): {}/{} completed",
            self.run_id,
            self.feature_slug,
            self.started_at.to_rfc3339(),
            self.units_completed,
            self.units_total
        )?;
        for unit in self.units.values() {
            write!(f, "  {:<12} {}", unit.unit_id, unit.status)?;
            if let Some(err) = unit.last_error.as_deref() {
                write!(f, "  ({err})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_stamp_every_phase() {
        let now = Utc::now();
        let mut unit = UnitExecution::new("WP01");

        unit.mark_ready().unwrap();
        unit.begin_implementation(now).unwrap();
        unit.complete_implementation(now).unwrap();
        unit.begin_review(now).unwrap();
        unit.approve(now).unwrap();

        assert_eq!(unit.status, UnitStatus::Completed);
        assert!(unit.implementation_started.is_some());
        assert!(unit.implementation_completed.is_some());
        assert!(unit.review_started.is_some());
        assert!(unit.review_completed.is_some());
        assert!(unit.invariant_violations().is_empty());
    }

    #[test]
    fn terminal_states_have_no_way_out() {
        let mut done = UnitExecution::new("WP01");
        done.status = UnitStatus::Completed;
        assert!(done.fail("late").is_err());
        assert!(done.mark_ready().is_err());

        let mut failed = UnitExecution::new("WP02");
        failed.fail("boom").unwrap();
        assert!(failed.begin_implementation(Utc::now()).is_err());
        assert_eq!(failed.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn illegal_shortcuts_are_rejected() {
        let mut unit = UnitExecution::new("WP01");
        assert!(unit.begin_review(Utc::now()).is_err());
        assert!(unit.approve(Utc::now()).is_err());
        assert!(unit.reject().is_err());

        unit.begin_implementation(Utc::now()).unwrap();
        assert!(unit.begin_review(Utc::now()).is_err(), "implementation not completed yet");
    }

    #[test]
    fn failure_always_carries_a_message() {
        let mut unit = UnitExecution::new("WP01");
        unit.fail("   ").unwrap();
        assert_eq!(unit.last_error.as_deref(), Some("unknown error"));
        assert!(unit.invariant_violations().is_empty());
    }

    #[test]
    fn rejection_keeps_stamps_and_new_pass_clears_them() {
        let t0 = Utc::now();
        let mut unit = UnitExecution::new("WP01");
        unit.begin_implementation(t0).unwrap();
        unit.complete_implementation(t0).unwrap();
        unit.begin_review(t0).unwrap();
        unit.reject().unwrap();

        assert_eq!(unit.status, UnitStatus::Pending);
        assert_eq!(unit.review_cycles, 1);
        assert_eq!(unit.implementation_completed, Some(t0));
        assert_eq!(unit.review_started, Some(t0));

        let t1 = Utc::now();
        unit.begin_implementation(t1).unwrap();
        assert_eq!(unit.implementation_started, Some(t1));
        assert_eq!(unit.implementation_completed, None);
        assert_eq!(unit.review_started, None);
    }

    #[test]
    fn apply_counts_completions_once_and_ignores_terminal_updates() {
        let mut run = Run::new("001-feature", ["WP01".to_string(), "WP02".to_string()]);
        let now = Utc::now();

        let mut wp01 = run.unit("WP01").cloned().unwrap();
        wp01.begin_implementation(now).unwrap();
        wp01.complete_implementation(now).unwrap();
        wp01.begin_review(now).unwrap();
        wp01.approve(now).unwrap();

        run.apply(wp01.clone()).unwrap();
        run.apply(wp01).unwrap();
        assert_eq!(run.units_completed, 1);

        let mut stale = UnitExecution::new("WP01");
        stale.status = UnitStatus::Review;
        run.apply(stale).unwrap();
        assert_eq!(run.status_of("WP01"), Some(UnitStatus::Completed));

        assert!(matches!(
            run.apply(UnitExecution::new("WP09")),
            Err(WpflowError::UnitNotFound(_))
        ));
    }

    #[test]
    fn reconcile_adds_new_units_and_drops_vanished_ones() {
        let mut run = Run::new("001-feature", ["WP01".to_string(), "WP02".to_string()]);
        run.units.get_mut("WP01").unwrap().status = UnitStatus::Completed;

        let ids: BTreeSet<UnitId> = ["WP01", "WP03"].iter().map(|s| s.to_string()).collect();
        run.reconcile(&ids);

        assert_eq!(run.units_total, 2);
        assert_eq!(run.units_completed, 1);
        assert_eq!(run.status_of("WP03"), Some(UnitStatus::Pending));
        assert!(run.unit("WP02").is_none());
        assert!(run.invariant_violations().is_empty());
    }

    #[test]
    fn status_serializes_as_snake_case_and_rejects_unknown_values() {
        assert_eq!(
            serde_json::to_string(&UnitStatus::Implementation).unwrap(),
            "\"implementation\""
        );
        assert!(serde_json::from_str::<UnitStatus>("\"in_progress\"").is_err());
    }
}
