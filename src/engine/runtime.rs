// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::dag::{AdmissionController, Scheduler};
use crate::errors::Result;
use crate::exec::UnitContext;
use crate::state::StateStore;
use crate::types::UnitId;

use super::processor::{ProcessOutcome, UnitProcessor};
use super::{ProgressCallback, RunEvent, RunOutcome, RunReport, RuntimeOptions};

/// Reason recorded for a unit whose task panicked.
pub const TASK_PANIC_ERROR: &str = "unit task panicked";

/// Deadline used when `global_timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Drives the scheduler: dispatches admitted units to processor tasks,
/// folds their transitions into the run and persists after every change.
///
/// The runtime is the only writer of the `Run`. Processor tasks report
/// through `RunEvent`s and their final `ProcessOutcome`.
pub struct Runtime {
    scheduler: Scheduler,
    admission: Arc<AdmissionController>,
    processor: UnitProcessor,
    store: StateStore,
    event_rx: mpsc::Receiver<RunEvent>,
    options: RuntimeOptions,
    progress: Option<ProgressCallback>,
    tasks: JoinSet<ProcessOutcome>,
    task_units: HashMap<Id, UnitId>,
    shutdown: bool,
    events_closed: bool,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .field("running", &self.task_units.len())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        scheduler: Scheduler,
        admission: Arc<AdmissionController>,
        processor: UnitProcessor,
        store: StateStore,
        event_rx: mpsc::Receiver<RunEvent>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            admission,
            processor,
            store,
            event_rx,
            options,
            progress: None,
            tasks: JoinSet::new(),
            task_units: HashMap::new(),
            shutdown: false,
            events_closed: false,
        }
    }

    /// Install a callback invoked with a progress snapshot every iteration.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Main loop.
    ///
    /// Each iteration folds pending events, reaps finished tasks, reports
    /// progress, checks the stop conditions and dispatches whatever the
    /// scheduler and admission allow. It then waits for the next event,
    /// task completion or the deadline.
    pub async fn run(mut self) -> Result<RunReport> {
        let deadline = self.deadline();
        info!(
            run_id = %self.scheduler.run().run_id,
            feature = %self.scheduler.run().feature_slug,
            units = self.scheduler.run().units_total,
            "wpflow runtime started"
        );
        self.persist()?;

        let outcome = loop {
            self.drain_events()?;
            while let Some(joined) = self.tasks.try_join_next_with_id() {
                self.handle_joined(joined)?;
            }
            self.report_progress();

            if self.scheduler.all_terminal() && self.tasks.is_empty() {
                break RunOutcome::Finished;
            }
            if self.shutdown {
                break RunOutcome::Interrupted;
            }
            if Instant::now() >= deadline {
                break RunOutcome::TimedOut;
            }

            let dispatched = self.dispatch_ready();
            if dispatched == 0 && self.tasks.is_empty() {
                break RunOutcome::Deadlocked;
            }

            tokio::select! {
                maybe_event = self.event_rx.recv(), if !self.events_closed => match maybe_event {
                    Some(event) => self.handle_event(event)?,
                    None => self.events_closed = true,
                },
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.handle_joined(joined)?;
                }
                _ = sleep_until(deadline) => {}
            }
        };

        match outcome {
            RunOutcome::Interrupted => {
                info!(in_flight = self.tasks.len(), "shutdown requested; waiting for in-flight phases");
                self.processor.request_stop();
                self.drain_tasks().await?;
            }
            RunOutcome::TimedOut => {
                warn!(in_flight = self.tasks.len(), "global timeout elapsed; waiting for in-flight phases");
                self.processor.request_stop();
                self.drain_tasks().await?;
            }
            RunOutcome::Deadlocked => {
                error!("no unit can make progress; halting run");
            }
            RunOutcome::Finished => {}
        }

        self.persist()?;
        self.report_progress();

        let blocked = if outcome == RunOutcome::Finished {
            Vec::new()
        } else {
            self.scheduler.blocked_units()
        };
        for b in &blocked {
            warn!(unit = %b.unit_id, status = %b.status, waiting_on = ?b.waiting_on, "unit left unfinished");
        }

        if outcome == RunOutcome::Finished {
            self.store.clear()?;
        }

        let report = RunReport::from_run(self.scheduler.run(), outcome, blocked);
        info!(
            outcome = %report.outcome,
            completed = self.scheduler.run().units_completed,
            total = self.scheduler.run().units_total,
            "runtime exiting"
        );
        Ok(report)
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.options.global_timeout).unwrap_or_else(|| {
            warn!(timeout = ?self.options.global_timeout, "global timeout out of range; running without a deadline");
            now + FAR_FUTURE
        })
    }

    /// Hand every dispatchable unit that gets an admission slot to a new
    /// processor task. Returns how many were dispatched.
    fn dispatch_ready(&mut self) -> usize {
        let mut dispatched = 0;

        for candidate in self.scheduler.dispatchable() {
            let Some(permit) = self.admission.try_acquire(&candidate.agent) else {
                debug!(unit = %candidate.unit_id, agent = %candidate.agent, "no admission slot; unit waits");
                continue;
            };
            let Some(execution) = self.scheduler.run().unit(&candidate.unit_id).cloned() else {
                continue;
            };

            let ctx = UnitContext {
                unit_id: candidate.unit_id.clone(),
                feature_slug: self.scheduler.run().feature_slug.clone(),
                agent: candidate.agent.clone(),
                review_cycle: execution.review_cycles,
            };
            info!(
                unit = %candidate.unit_id,
                agent = %candidate.agent,
                status = %execution.status,
                "dispatching unit"
            );

            let processor = self.processor.clone();
            let handle = self.tasks.spawn(async move {
                // Held for the whole task; dropping it releases the slot on
                // every exit path, unwinding included.
                let _permit = permit;
                processor.process(execution, ctx).await
            });

            self.task_units.insert(handle.id(), candidate.unit_id.clone());
            self.scheduler.mark_dispatched(&candidate.unit_id);
            dispatched += 1;
        }

        dispatched
    }

    fn handle_event(&mut self, event: RunEvent) -> Result<()> {
        match event {
            RunEvent::UnitTransitioned(execution) => {
                debug!(unit = %execution.unit_id, status = %execution.status, "unit transitioned");
                let step = self.scheduler.apply_update(execution)?;
                if step.newly_failed.len() > 1 {
                    warn!(failed = ?step.newly_failed, "failure cascaded to dependents");
                }
                self.persist()?;
            }
            RunEvent::ShutdownRequested => {
                if !self.shutdown {
                    info!("shutdown requested; no new units will be dispatched");
                }
                self.shutdown = true;
            }
        }
        Ok(())
    }

    fn drain_events(&mut self) -> Result<()> {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// Fold the result of a finished task.
    ///
    /// Pending events are drained first: a task publishes all of its
    /// transitions before it ends, so none of them may be applied after its
    /// final record.
    fn handle_joined(
        &mut self,
        joined: std::result::Result<(Id, ProcessOutcome), JoinError>,
    ) -> Result<()> {
        self.drain_events()?;

        match joined {
            Ok((id, outcome)) => {
                let Some(unit_id) = self.task_units.remove(&id) else {
                    warn!(?id, "finished task was not tracked");
                    return Ok(());
                };
                self.scheduler.finish_task(&unit_id);
                debug!(unit = %unit_id, status = %outcome.execution.status, "unit task finished");
                self.scheduler.apply_update(outcome.execution)?;
            }
            Err(err) => {
                let Some(unit_id) = self.task_units.remove(&err.id()) else {
                    warn!(error = %err, "untracked task failed");
                    return Ok(());
                };
                self.scheduler.finish_task(&unit_id);

                if err.is_panic() {
                    error!(unit = %unit_id, "unit task panicked");
                    self.scheduler.fail_unit(&unit_id, TASK_PANIC_ERROR)?;
                } else {
                    info!(unit = %unit_id, "unit task cancelled; status kept for resume");
                }
            }
        }

        self.persist()
    }

    /// Wait for every remaining task, still folding their transitions.
    async fn drain_tasks(&mut self) -> Result<()> {
        while !self.tasks.is_empty() {
            tokio::select! {
                maybe_event = self.event_rx.recv(), if !self.events_closed => match maybe_event {
                    Some(event) => self.handle_event(event)?,
                    None => self.events_closed = true,
                },
                Some(joined) = self.tasks.join_next_with_id() => {
                    self.handle_joined(joined)?;
                }
                else => break,
            }
        }
        self.drain_events()
    }

    fn persist(&self) -> Result<()> {
        self.store.save(self.scheduler.run())
    }

    fn report_progress(&mut self) {
        let progress = self.scheduler.progress();
        if let Some(callback) = self.progress.as_mut() {
            callback(&progress);
        }
    }
}
