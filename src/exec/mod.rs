// src/exec/mod.rs

//! Agent execution layer.
//!
//! - [`backend`] provides the `AgentBackend` trait the unit processor calls
//!   for the implementation and review phases.
//! - [`command`] is the production backend, running each agent's configured
//!   shell commands with `tokio::process::Command`.

pub mod backend;
pub mod command;

pub use backend::{AgentBackend, BoxFuture, UnitContext};
pub use command::CommandAgentBackend;
