// src/dag/scheduler.rs

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::scheduler_step::{BlockedUnit, DispatchCandidate, RunProgress, SchedulerStep};
use crate::errors::{Result, WpflowError};
use crate::state::{Run, UnitExecution, UnitStatus};
use crate::types::UnitId;

/// Scheduler holds the immutable dependency graph plus the mutable `Run`.
///
/// It is responsible for:
/// - promoting units whose dependencies all completed to READY
/// - choosing which units may be handed to the processor
/// - folding unit updates into the run
/// - failing waiting dependents when a unit fails
///
/// It performs no IO; the runtime persists `run()` after every change.
#[derive(Debug)]
pub struct Scheduler {
    graph: DependencyGraph,
    /// Topological order, used for every deterministic iteration.
    order: Vec<UnitId>,
    run: Run,
    assignments: BTreeMap<UnitId, String>,
    /// Units with a task currently bound to them.
    running: BTreeSet<UnitId>,
}

impl Scheduler {
    /// Build a scheduler over `run`, which must cover exactly the graph's
    /// units. Failed units found in the run are cascaded straight away.
    pub fn new(
        graph: DependencyGraph,
        run: Run,
        assignments: BTreeMap<UnitId, String>,
    ) -> Result<Self> {
        let order = graph.topological_sort()?;

        let graph_ids: BTreeSet<&str> = graph.units().collect();
        let run_ids: BTreeSet<&str> = run.units.keys().map(String::as_str).collect();
        if graph_ids != run_ids {
            return Err(WpflowError::StateError(format!(
                "run tracks units [{}] but the graph declares [{}]",
                run_ids.into_iter().collect::<Vec<_>>().join(", "),
                graph_ids.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        let unassigned: Vec<&str> = order
            .iter()
            .filter(|id| !assignments.contains_key(*id))
            .map(String::as_str)
            .collect();
        if !unassigned.is_empty() {
            return Err(WpflowError::ConfigError(format!(
                "no agent assigned to unit(s): {}",
                unassigned.join(", ")
            )));
        }

        let mut scheduler = Self {
            graph,
            order,
            run,
            assignments,
            running: BTreeSet::new(),
        };

        let already_failed: Vec<UnitId> = scheduler
            .order
            .iter()
            .filter(|id| scheduler.run.status_of(id) == Some(UnitStatus::Failed))
            .cloned()
            .collect();
        for id in already_failed {
            let cascaded = scheduler.cascade_failure(&id);
            if !cascaded.is_empty() {
                info!(unit = %id, ?cascaded, "cascaded failure recorded in resumed run");
            }
        }

        let ready = scheduler.promote_ready();
        debug!(?ready, "initial ready set");

        Ok(scheduler)
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn all_terminal(&self) -> bool {
        self.run.all_terminal()
    }

    /// Whether every dependency of `unit_id` is COMPLETED.
    pub fn deps_satisfied(&self, unit_id: &str) -> bool {
        self.graph
            .dependencies_of(unit_id)
            .iter()
            .all(|dep| self.run.status_of(dep) == Some(UnitStatus::Completed))
    }

    /// Promote every PENDING unit whose dependencies completed to READY.
    pub fn promote_ready(&mut self) -> Vec<UnitId> {
        let candidates: Vec<UnitId> = self
            .order
            .iter()
            .filter(|id| self.run.status_of(id) == Some(UnitStatus::Pending))
            .filter(|id| self.deps_satisfied(id))
            .cloned()
            .collect();

        let mut promoted = Vec::new();
        for id in candidates {
            if let Some(unit) = self.run.unit_mut(&id) {
                match unit.mark_ready() {
                    Ok(()) => {
                        debug!(unit = %id, "dependencies satisfied; unit is ready");
                        promoted.push(id);
                    }
                    Err(e) => warn!(unit = %id, error = %e, "could not promote unit"),
                }
            }
        }
        promoted
    }

    /// Units the runtime may dispatch now, with their agents.
    ///
    /// Units left in IMPLEMENTATION or REVIEW without a bound task (a resumed
    /// run) come first, then READY units. Both groups follow topological
    /// order. Admission is not checked here.
    pub fn dispatchable(&self) -> Vec<DispatchCandidate> {
        let unbound = self.order.iter().filter(|id| !self.running.contains(*id));

        let resumed = unbound
            .clone()
            .filter(|id| self.run.status_of(id).is_some_and(UnitStatus::is_in_progress));
        let ready = unbound
            .filter(|id| self.run.status_of(id) == Some(UnitStatus::Ready))
            .filter(|id| self.deps_satisfied(id));

        resumed
            .chain(ready)
            .filter_map(|id| {
                self.assignments.get(id).map(|agent| DispatchCandidate {
                    unit_id: id.clone(),
                    agent: agent.clone(),
                })
            })
            .collect()
    }

    /// Record that a task now owns `unit_id`.
    pub fn mark_dispatched(&mut self, unit_id: &str) {
        if !self.running.insert(unit_id.to_string()) {
            warn!(unit = %unit_id, "unit dispatched twice");
        }
    }

    /// Record that the task owning `unit_id` has ended.
    pub fn finish_task(&mut self, unit_id: &str) {
        if !self.running.remove(unit_id) {
            warn!(unit = %unit_id, "finished task for unit that was not running");
        }
    }

    /// Fold a snapshot produced by the processor into the run.
    pub fn apply_update(&mut self, update: UnitExecution) -> Result<SchedulerStep> {
        let unit_id = update.unit_id.clone();
        let was_terminal = self
            .run
            .status_of(&unit_id)
            .ok_or_else(|| WpflowError::UnitNotFound(unit_id.clone()))?
            .is_terminal();

        self.run.apply(update)?;
        let status = self.run.status_of(&unit_id);

        let mut step = SchedulerStep::default();
        if !was_terminal && status == Some(UnitStatus::Failed) {
            warn!(unit = %unit_id, "unit failed; failing waiting dependents");
            step.newly_failed.push(unit_id.clone());
            step.newly_failed.extend(self.cascade_failure(&unit_id));
        }
        if !was_terminal && status == Some(UnitStatus::Completed) {
            info!(
                unit = %unit_id,
                completed = self.run.units_completed,
                total = self.run.units_total,
                "unit completed"
            );
        }

        step.newly_ready = self.promote_ready();
        step.run_just_finished = self.run.all_terminal();
        Ok(step)
    }

    /// Force `unit_id` into FAILED, e.g. when its task panicked.
    ///
    /// Units already terminal are left alone.
    pub fn fail_unit(&mut self, unit_id: &str, reason: &str) -> Result<SchedulerStep> {
        let mut execution = self
            .run
            .unit(unit_id)
            .cloned()
            .ok_or_else(|| WpflowError::UnitNotFound(unit_id.to_string()))?;

        if execution.status.is_terminal() {
            return Ok(SchedulerStep {
                run_just_finished: self.run.all_terminal(),
                ..SchedulerStep::default()
            });
        }

        execution.fail(reason)?;
        self.apply_update(execution)
    }

    /// Fail every transitive dependent of `failed` that has not left the
    /// backlog. Returns the units that were failed, in topological order.
    fn cascade_failure(&mut self, failed: &str) -> Vec<UnitId> {
        let dependents: BTreeSet<UnitId> =
            self.graph.transitive_dependents(failed).into_iter().collect();

        let targets: Vec<UnitId> = self
            .order
            .iter()
            .filter(|id| dependents.contains(*id))
            .filter(|id| !self.running.contains(*id))
            .filter(|id| self.run.status_of(id).is_some_and(UnitStatus::is_waiting))
            .cloned()
            .collect();

        let mut newly_failed = Vec::new();
        for id in targets {
            let direct = self.graph.dependencies_of(&id).iter().any(|d| d == failed);
            let reason = if direct {
                format!("blocked by failed dependency '{failed}'")
            } else {
                format!("blocked by failed dependency '{failed}' (transitive)")
            };

            if let Some(unit) = self.run.unit_mut(&id) {
                match unit.fail(reason) {
                    Ok(()) => {
                        debug!(unit = %id, cause = %failed, "marked failed by cascade");
                        newly_failed.push(id);
                    }
                    Err(e) => warn!(unit = %id, error = %e, "could not cascade failure"),
                }
            }
        }
        newly_failed
    }

    /// Every non-terminal unit with the dependencies it still waits on.
    pub fn blocked_units(&self) -> Vec<BlockedUnit> {
        self.order
            .iter()
            .filter_map(|id| {
                let unit = self.run.unit(id)?;
                if unit.status.is_terminal() {
                    return None;
                }
                let waiting_on = self
                    .graph
                    .dependencies_of(id)
                    .iter()
                    .filter(|dep| self.run.status_of(dep) != Some(UnitStatus::Completed))
                    .cloned()
                    .collect();
                Some(BlockedUnit {
                    unit_id: id.clone(),
                    status: unit.status,
                    waiting_on,
                })
            })
            .collect()
    }

    pub fn progress(&self) -> RunProgress {
        let units = self.run.units.values();
        let mut progress = RunProgress {
            total: self.run.units.len(),
            ..RunProgress::default()
        };
        for unit in units {
            match unit.status {
                UnitStatus::Completed => progress.completed += 1,
                UnitStatus::Failed => progress.failed += 1,
                UnitStatus::Implementation | UnitStatus::Review => progress.running += 1,
                UnitStatus::Pending | UnitStatus::Ready => progress.waiting += 1,
            }
        }
        progress
    }
}
