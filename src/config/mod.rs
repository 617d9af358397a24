// src/config/mod.rs

//! Configuration loading and validation for wpflow.
//!
//! - [`model`] defines the TOML-backed data model and the validated
//!   [`OrchestratorConfig`].
//! - [`loader`] reads a config file from disk.
//! - [`validate`] turns a [`RawConfigFile`] into an [`OrchestratorConfig`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{DEFAULT_CONFIG_FILE, load_and_validate, load_from_path};
pub use model::{AgentConfig, OrchestratorConfig, OrchestratorSection, RawConfigFile};
pub use validate::parse_duration;
