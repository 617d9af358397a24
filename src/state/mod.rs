// src/state/mod.rs

//! Run state: the per-unit state machine ([`model`]) and its durable
//! storage ([`store`]).

pub mod model;
pub mod store;

pub use model::{Run, UnitExecution, UnitStatus};
pub use store::{STATE_FILE_NAME, StateStore};
