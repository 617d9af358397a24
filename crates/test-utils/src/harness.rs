#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use wpflow::config::OrchestratorConfig;
use wpflow::dag::{AdmissionController, DependencyGraph};
use wpflow::engine::{RunEvent, RunPlan, RunReport, Runtime, RuntimeOptions, UnitProcessor};
use wpflow::errors::Result;
use wpflow::fs::mock::MockFileSystem;
use wpflow::state::{Run, StateStore};
use wpflow::types::UnitId;
use wpflow::units::UnitMetadata;

use crate::fake_agent::{CallLog, FakeAgent, RecordingLaneStore, new_call_log};

/// Control directory used by every harness.
pub const CONTROL_DIR: &str = "/project/.wpflow";

/// Assembles a real `Runtime` around a [`FakeAgent`], a
/// [`RecordingLaneStore`] and an in-memory state file.
pub struct Harness {
    pub config: OrchestratorConfig,
    pub units: Vec<UnitMetadata>,
    pub log: CallLog,
    pub agent: Arc<FakeAgent>,
    pub lanes: Arc<RecordingLaneStore>,
    pub fs: MockFileSystem,
    pub store: StateStore,
    pub admission: Arc<AdmissionController>,
    assignments: Option<BTreeMap<UnitId, String>>,
}

impl Harness {
    pub fn new(config: OrchestratorConfig, units: Vec<UnitMetadata>) -> Self {
        let log = new_call_log();
        Self::with_agent(config, units, FakeAgent::new(log.clone()), log)
    }

    /// Use a pre-configured agent (e.g. one with a delay). `log` must be the
    /// log the agent writes to.
    pub fn with_agent(
        config: OrchestratorConfig,
        units: Vec<UnitMetadata>,
        agent: FakeAgent,
        log: CallLog,
    ) -> Self {
        let fs = MockFileSystem::new();
        let store = StateStore::new(Arc::new(fs.clone()), Path::new(CONTROL_DIR));
        let admission = Arc::new(AdmissionController::new(&config.agents));
        Self {
            lanes: Arc::new(RecordingLaneStore::new(log.clone())),
            agent: Arc::new(agent),
            log,
            config,
            units,
            fs,
            store,
            admission,
            assignments: None,
        }
    }

    /// Bypass agent resolution and its start-up checks.
    pub fn with_assignments(mut self, assignments: &[(&str, &str)]) -> Self {
        self.assignments = Some(
            assignments
                .iter()
                .map(|(u, a)| (u.to_string(), a.to_string()))
                .collect(),
        );
        self
    }

    /// Persist `run` so the next start resumes it.
    pub fn seed(&self, run: &Run) {
        self.store.save(run).expect("seeding state file");
    }

    pub fn plan(&self) -> Result<RunPlan> {
        let Some(assignments) = self.assignments.clone() else {
            return RunPlan::build(&StaticUnits(self.units.clone()), &self.config);
        };
        let graph = DependencyGraph::build(&self.units)?;
        let order = graph.topological_sort()?;
        Ok(RunPlan {
            feature_slug: FEATURE_SLUG.to_string(),
            units: self.units.clone(),
            graph,
            order,
            assignments,
        })
    }

    /// Build the runtime and hand back a sender for extra events
    /// (e.g. `ShutdownRequested`).
    pub fn start(&self) -> Result<(Runtime, mpsc::Sender<RunEvent>)> {
        let plan = self.plan()?;
        let run = plan.prepare_run(&self.store, false)?;

        let (tx, rx) = mpsc::channel(64);
        let processor = UnitProcessor::new(
            self.agent.clone(),
            self.lanes.clone(),
            self.config.max_review_cycles,
            tx.clone(),
        );
        let scheduler = plan.into_scheduler(run)?;
        let runtime = Runtime::new(
            scheduler,
            self.admission.clone(),
            processor,
            self.store.clone(),
            rx,
            RuntimeOptions {
                global_timeout: self.config.global_timeout,
            },
        );
        Ok((runtime, tx))
    }

    pub async fn run(&self) -> Result<RunReport> {
        let (runtime, _tx) = self.start()?;
        runtime.run().await
    }

    /// The persisted run, if the state file still exists.
    pub fn persisted(&self) -> Option<Run> {
        self.store.load().expect("loading state file")
    }
}

/// Feature slug reported by harness unit sources.
pub const FEATURE_SLUG: &str = "001-test-feature";

struct StaticUnits(Vec<UnitMetadata>);

impl wpflow::units::UnitSource for StaticUnits {
    fn read_units(&self) -> Result<Vec<UnitMetadata>> {
        Ok(self.0.clone())
    }

    fn feature_slug(&self) -> String {
        FEATURE_SLUG.to_string()
    }
}
