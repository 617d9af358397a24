// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::UnitId;

#[derive(Error, Debug)]
pub enum WpflowError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unit not found: {0}")]
    UnitNotFound(UnitId),

    #[error("Malformed dependencies: {}", .0.join("; "))]
    MalformedDependency(Vec<String>),

    #[error("Cycle detected in dependency graph: {}", .0.join(", "))]
    DependencyCycle(Vec<UnitId>),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Run did not complete: {0}")]
    RunIncomplete(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WpflowError>;
