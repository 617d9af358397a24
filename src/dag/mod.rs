// src/dag/mod.rs

//! Dependency graph and scheduling.
//!
//! - [`graph`] holds the validated dependency graph between work units.
//! - [`admission`] gates how many units each agent works on at once.
//! - [`scheduler`] owns the run and decides which units may be dispatched.
//! - [`scheduler_step`] defines the result and report types of the scheduler.

pub mod admission;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;

pub use admission::{AdmissionController, AdmissionPermit};
pub use graph::DependencyGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::{BlockedUnit, DispatchCandidate, RunProgress, SchedulerStep};
