//! Exact call ordering between lane writes and published status changes.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use wpflow::engine::{RunEvent, UnitProcessor};
use wpflow::errors::Result;
use wpflow::exec::UnitContext;
use wpflow::lanes::LaneStore;
use wpflow::state::{UnitExecution, UnitStatus};
use wpflow::types::Lane;
use wpflow_test_utils::fake_agent::{FakeAgent, new_call_log};
use wpflow_test_utils::init_tracing;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Lane(Lane),
    Status(UnitStatus),
}

/// Lane store that, before recording a lane write, drains every status the
/// processor already published. The resulting timeline shows the true
/// interleaving of lane writes and status changes.
struct TimelineLanes {
    rx: Mutex<mpsc::Receiver<RunEvent>>,
    timeline: Mutex<Vec<Step>>,
}

impl TimelineLanes {
    fn new(rx: mpsc::Receiver<RunEvent>) -> Self {
        Self {
            rx: Mutex::new(rx),
            timeline: Mutex::new(Vec::new()),
        }
    }

    fn drain(&self) {
        let mut rx = self.rx.lock();
        while let Ok(RunEvent::UnitTransitioned(exec)) = rx.try_recv() {
            self.timeline.lock().push(Step::Status(exec.status));
        }
    }

    fn finish(&self) -> Vec<Step> {
        self.drain();
        self.timeline.lock().clone()
    }
}

impl LaneStore for TimelineLanes {
    fn transition_lane(&self, _unit_id: &str, lane: Lane) -> Result<()> {
        self.drain();
        self.timeline.lock().push(Step::Lane(lane));
        Ok(())
    }

    fn record_review_feedback(&self, _unit_id: &str, _feedback: &str) -> Result<()> {
        Ok(())
    }
}

fn ctx(unit: &str) -> UnitContext {
    UnitContext {
        unit_id: unit.to_string(),
        feature_slug: "001-checkout".to_string(),
        agent: "claude".to_string(),
        review_cycle: 0,
    }
}

fn setup(agent: FakeAgent) -> (UnitProcessor, Arc<TimelineLanes>) {
    let (tx, rx) = mpsc::channel(32);
    let lanes = Arc::new(TimelineLanes::new(rx));
    let processor = UnitProcessor::new(Arc::new(agent), lanes.clone(), 3, tx);
    (processor, lanes)
}

#[tokio::test]
async fn lane_is_written_before_each_status_change() {
    init_tracing();
    let (processor, lanes) = setup(FakeAgent::new(new_call_log()));

    let outcome = processor.process(UnitExecution::new("WP01"), ctx("WP01")).await;

    assert_eq!(outcome.execution.status, UnitStatus::Completed);
    assert_eq!(
        lanes.finish(),
        vec![
            Step::Lane(Lane::Doing),
            Step::Status(UnitStatus::Implementation),
            // implementation_completed stamped
            Step::Status(UnitStatus::Implementation),
            Step::Lane(Lane::ForReview),
            Step::Status(UnitStatus::Review),
            Step::Lane(Lane::Done),
            Step::Status(UnitStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn rejection_writes_planned_lane_before_pending_status() {
    init_tracing();
    let agent = FakeAgent::new(new_call_log());
    agent.script_reviews("WP02", [FakeAgent::reject("split the migration")]);
    let (processor, lanes) = setup(agent);

    let outcome = processor.process(UnitExecution::new("WP02"), ctx("WP02")).await;

    assert_eq!(outcome.execution.status, UnitStatus::Pending);
    assert_eq!(outcome.execution.review_cycles, 1);
    let timeline = lanes.finish();
    assert_eq!(
        timeline[timeline.len() - 2..],
        [Step::Lane(Lane::Planned), Step::Status(UnitStatus::Pending)]
    );
}

#[tokio::test]
async fn stamps_are_set_in_phase_order() {
    init_tracing();
    let (processor, _lanes) = setup(FakeAgent::new(new_call_log()));
    let before = Utc::now();

    let exec = processor
        .process(UnitExecution::new("WP03"), ctx("WP03"))
        .await
        .execution;

    let started = exec.implementation_started.unwrap();
    let implemented = exec.implementation_completed.unwrap();
    let review_started = exec.review_started.unwrap();
    let reviewed = exec.review_completed.unwrap();
    assert!(before <= started);
    assert!(started <= implemented);
    assert!(implemented <= review_started);
    assert!(review_started <= reviewed);
    assert!(exec.last_error.is_none());
}

#[tokio::test]
async fn failed_implementation_publishes_failed_without_touching_lane_again() {
    init_tracing();
    let agent = FakeAgent::new(new_call_log());
    agent.fail_implementation("WP04", "exit status 3");
    let (processor, lanes) = setup(agent);

    let exec = processor
        .process(UnitExecution::new("WP04"), ctx("WP04"))
        .await
        .execution;

    assert_eq!(exec.status, UnitStatus::Failed);
    assert_eq!(exec.last_error.as_deref(), Some("exit status 3"));
    assert_eq!(
        lanes.finish(),
        vec![
            Step::Lane(Lane::Doing),
            Step::Status(UnitStatus::Implementation),
            Step::Status(UnitStatus::Failed),
        ]
    );
}
