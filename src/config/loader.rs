// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{OrchestratorConfig, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default functions).
/// - Checks agent ceilings, the default agent and the global timeout.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<OrchestratorConfig> {
    let raw_config = load_from_path(&path)?;
    let config = OrchestratorConfig::try_from(raw_config)?;
    Ok(config)
}

/// File name looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "Wpflow.toml";

