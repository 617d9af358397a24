use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wpflow::errors::{Result, WpflowError};
use wpflow::exec::{AgentBackend, BoxFuture, UnitContext};
use wpflow::lanes::LaneStore;
use wpflow::types::{Lane, ReviewOutcome, UnitId};

/// One observed collaborator call, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Lane { unit: UnitId, lane: Lane },
    Implement { unit: UnitId, agent: String },
    Review { unit: UnitId, agent: String },
    Feedback { unit: UnitId, feedback: String },
}

/// Shared, ordered log of calls made to the fake agent and lane store.
pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// What the next implementation attempt of a unit does.
#[derive(Debug, Clone)]
pub enum ImplScript {
    Succeed,
    Fail(String),
    Panic,
}

/// A scripted agent backend.
///
/// - implementation succeeds unless a script says otherwise
/// - review approves unless review outcomes were queued for the unit
/// - every call is appended to the shared [`CallLog`]
/// - tracks peak concurrent calls per agent
pub struct FakeAgent {
    log: CallLog,
    delay: Duration,
    implementations: Mutex<HashMap<UnitId, VecDeque<ImplScript>>>,
    reviews: Mutex<HashMap<UnitId, VecDeque<ReviewOutcome>>>,
    in_flight: Mutex<HashMap<String, usize>>,
    peak: Mutex<HashMap<String, usize>>,
}

impl FakeAgent {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            delay: Duration::ZERO,
            implementations: Mutex::new(HashMap::new()),
            reviews: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            peak: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep this long inside every phase so concurrent units overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script_implementation(&self, unit: &str, script: ImplScript) {
        self.implementations
            .lock()
            .entry(unit.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn fail_implementation(&self, unit: &str, message: &str) {
        self.script_implementation(unit, ImplScript::Fail(message.to_string()));
    }

    pub fn script_reviews(&self, unit: &str, outcomes: impl IntoIterator<Item = ReviewOutcome>) {
        self.reviews
            .lock()
            .entry(unit.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn reject(feedback: &str) -> ReviewOutcome {
        ReviewOutcome::Rejected {
            feedback: Some(feedback.to_string()),
        }
    }

    /// Highest number of simultaneous phase calls observed for `agent`.
    pub fn peak_concurrency(&self, agent: &str) -> usize {
        self.peak.lock().get(agent).copied().unwrap_or(0)
    }

    fn enter(&self, agent: &str) -> InFlightGuard<'_> {
        let mut in_flight = self.in_flight.lock();
        let current = in_flight.entry(agent.to_string()).or_insert(0);
        *current += 1;
        let mut peak = self.peak.lock();
        let p = peak.entry(agent.to_string()).or_insert(0);
        *p = (*p).max(*current);
        InFlightGuard {
            agent: self,
            name: agent.to_string(),
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

struct InFlightGuard<'a> {
    agent: &'a FakeAgent,
    name: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(n) = self.agent.in_flight.lock().get_mut(&self.name) {
            *n = n.saturating_sub(1);
        }
    }
}

impl AgentBackend for FakeAgent {
    fn run_implementation<'a>(&'a self, ctx: &'a UnitContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.log.lock().push(Call::Implement {
                unit: ctx.unit_id.clone(),
                agent: ctx.agent.clone(),
            });
            let _guard = self.enter(&ctx.agent);
            self.pause().await;

            let script = self
                .implementations
                .lock()
                .get_mut(&ctx.unit_id)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(ImplScript::Succeed);

            match script {
                ImplScript::Succeed => Ok(()),
                ImplScript::Fail(message) => Err(WpflowError::Other(anyhow::anyhow!(message))),
                ImplScript::Panic => panic!("scripted panic in {}", ctx.unit_id),
            }
        })
    }

    fn run_review<'a>(&'a self, ctx: &'a UnitContext) -> BoxFuture<'a, Result<ReviewOutcome>> {
        Box::pin(async move {
            self.log.lock().push(Call::Review {
                unit: ctx.unit_id.clone(),
                agent: ctx.agent.clone(),
            });
            let _guard = self.enter(&ctx.agent);
            self.pause().await;

            let outcome = self
                .reviews
                .lock()
                .get_mut(&ctx.unit_id)
                .and_then(|queue| queue.pop_front())
                .unwrap_or(ReviewOutcome::Approved);
            Ok(outcome)
        })
    }
}

/// Lane store that only records calls and remembers the latest lanes.
pub struct RecordingLaneStore {
    log: CallLog,
    lanes: Mutex<HashMap<UnitId, Lane>>,
}

impl RecordingLaneStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn lane_of(&self, unit: &str) -> Option<Lane> {
        self.lanes.lock().get(unit).copied()
    }
}

impl LaneStore for RecordingLaneStore {
    fn transition_lane(&self, unit_id: &str, lane: Lane) -> Result<()> {
        self.log.lock().push(Call::Lane {
            unit: unit_id.to_string(),
            lane,
        });
        self.lanes.lock().insert(unit_id.to_string(), lane);
        Ok(())
    }

    fn record_review_feedback(&self, unit_id: &str, feedback: &str) -> Result<()> {
        self.log.lock().push(Call::Feedback {
            unit: unit_id.to_string(),
            feedback: feedback.to_string(),
        });
        Ok(())
    }
}

/// Calls that concern `unit`, in order.
pub fn calls_for(log: &CallLog, unit: &str) -> Vec<Call> {
    log.lock()
        .iter()
        .filter(|call| match call {
            Call::Lane { unit: u, .. }
            | Call::Implement { unit: u, .. }
            | Call::Review { unit: u, .. }
            | Call::Feedback { unit: u, .. } => u == unit,
        })
        .cloned()
        .collect()
}
