// src/exec/backend.rs

//! Pluggable agent backend abstraction.
//!
//! The unit processor talks to an `AgentBackend` instead of spawning agents
//! itself. This makes it easy to swap in a scripted fake in tests while
//! keeping the production implementation in [`command`](super::command).

use std::future::Future;
use std::pin::Pin;

use crate::errors::Result;
use crate::types::{ReviewOutcome, UnitId};

/// Boxed future returned by backend operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What an agent is told about the unit it works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitContext {
    pub unit_id: UnitId,
    pub feature_slug: String,
    pub agent: String,
    /// Number of earlier review rejections for this unit.
    pub review_cycle: u32,
}

/// Trait abstracting how the two phases of a unit are carried out.
///
/// Both operations are the only places a unit task suspends. An `Err` marks
/// the unit failed; it never aborts the scheduler.
pub trait AgentBackend: Send + Sync {
    /// Run (or re-run) the implementation phase. Must tolerate being called
    /// again for a unit whose previous attempt was interrupted.
    fn run_implementation<'a>(&'a self, ctx: &'a UnitContext) -> BoxFuture<'a, Result<()>>;

    fn run_review<'a>(&'a self, ctx: &'a UnitContext) -> BoxFuture<'a, Result<ReviewOutcome>>;
}
