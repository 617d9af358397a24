// src/engine/plan.rs

//! Start-up checks that turn discovered units into a schedulable run.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::dag::{DependencyGraph, Scheduler};
use crate::errors::{Result, WpflowError};
use crate::state::{Run, StateStore};
use crate::types::UnitId;
use crate::units::{UnitMetadata, UnitSource, assign_agents};

/// Everything known about a feature before any unit is dispatched.
///
/// Building a plan runs every fatal check: dangling or duplicate
/// dependencies, cycles and agent assignment.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub feature_slug: String,
    pub units: Vec<UnitMetadata>,
    pub graph: DependencyGraph,
    /// Deterministic execution order.
    pub order: Vec<UnitId>,
    pub assignments: BTreeMap<UnitId, String>,
}

impl RunPlan {
    pub fn build(source: &dyn UnitSource, config: &OrchestratorConfig) -> Result<Self> {
        let units = source.read_units()?;
        let graph = DependencyGraph::build(&units)?;

        if let Some(cycle) = graph.detect_cycles() {
            return Err(WpflowError::DependencyCycle(cycle));
        }
        let order = graph.topological_sort()?;
        let assignments = assign_agents(&units, config)?;

        Ok(Self {
            feature_slug: source.feature_slug(),
            units,
            graph,
            order,
            assignments,
        })
    }

    pub fn unit(&self, unit_id: &str) -> Option<&UnitMetadata> {
        self.units.iter().find(|u| u.id == unit_id)
    }

    /// The run to drive: the persisted one when it exists (and `fresh` is
    /// not set), otherwise a new run with every unit PENDING.
    ///
    /// A resumed run keeps its id and start time. It is reconciled with the
    /// units declared now.
    pub fn prepare_run(&self, store: &StateStore, fresh: bool) -> Result<Run> {
        if fresh {
            info!(feature = %self.feature_slug, "starting fresh run; ignoring persisted state");
        } else if let Some(mut run) = store.load()? {
            if run.feature_slug != self.feature_slug {
                return Err(WpflowError::StateError(format!(
                    "state file {:?} belongs to feature '{}', not '{}' (use --fresh to discard it)",
                    store.path(),
                    run.feature_slug,
                    self.feature_slug
                )));
            }

            let ids: BTreeSet<UnitId> = self.order.iter().cloned().collect();
            run.reconcile(&ids);
            let in_progress = run.units.values().filter(|u| u.status.is_in_progress()).count();
            info!(
                run_id = %run.run_id,
                completed = run.units_completed,
                total = run.units_total,
                in_progress,
                "resuming persisted run"
            );
            return Ok(run);
        }

        Ok(Run::new(self.feature_slug.clone(), self.order.iter().cloned()))
    }

    /// Hand the graph and assignments to a scheduler over `run`.
    pub fn into_scheduler(self, run: Run) -> Result<Scheduler> {
        if run.units.is_empty() {
            warn!(feature = %self.feature_slug, "feature declares no work units");
        }
        Scheduler::new(self.graph, run, self.assignments)
    }
}
