// src/units.rs

//! Work unit discovery.
//!
//! The scheduler only needs each unit's id, its declared dependencies and the
//! agent it should run on. [`UnitSource`] is the seam; [`ManifestUnitSource`]
//! reads a `units.toml` manifest from the feature directory:
//!
//! ```toml
//! [unit.WP01]
//! title = "Storage layer"
//!
//! [unit.WP02]
//! dependencies = ["WP01"]
//! agent = "codex"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::config::OrchestratorConfig;
use crate::errors::{Result, WpflowError};
use crate::fs::FileSystem;
use crate::types::UnitId;

/// File name of the unit manifest inside a feature directory.
pub const MANIFEST_FILE_NAME: &str = "units.toml";

/// Metadata the scheduler needs about one work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitMetadata {
    pub id: UnitId,
    pub dependencies: Vec<UnitId>,
    pub agent: Option<String>,
    pub title: Option<String>,
}

impl UnitMetadata {
    pub fn new(id: impl Into<UnitId>, dependencies: &[&str]) -> Self {
        Self {
            id: id.into(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            agent: None,
            title: None,
        }
    }
}

/// Discovers work units and their declared dependency ids.
pub trait UnitSource {
    fn read_units(&self) -> Result<Vec<UnitMetadata>>;

    /// Stable name of the feature the units belong to.
    fn feature_slug(&self) -> String;
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    unit: BTreeMap<UnitId, ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    dependencies: Vec<UnitId>,
}

/// Reads `<feature_dir>/units.toml`.
#[derive(Debug, Clone)]
pub struct ManifestUnitSource {
    fs: Arc<dyn FileSystem>,
    feature_dir: PathBuf,
}

impl ManifestUnitSource {
    pub fn new(fs: Arc<dyn FileSystem>, feature_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            feature_dir: feature_dir.into(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.feature_dir.join(MANIFEST_FILE_NAME)
    }
}

impl UnitSource for ManifestUnitSource {
    fn read_units(&self) -> Result<Vec<UnitMetadata>> {
        let path = self.manifest_path();
        if !self.fs.is_file(&path) {
            return Err(WpflowError::ConfigError(format!(
                "no unit manifest found at {}",
                path.display()
            )));
        }

        let contents = self.fs.read_to_string(&path)?;
        let manifest: RawManifest = toml::from_str(&contents)?;

        if manifest.unit.is_empty() {
            return Err(WpflowError::ConfigError(format!(
                "{} must contain at least one [unit.<id>] section",
                path.display()
            )));
        }

        Ok(manifest
            .unit
            .into_iter()
            .map(|(id, entry)| UnitMetadata {
                id,
                dependencies: entry.dependencies,
                agent: entry.agent,
                title: entry.title,
            })
            .collect())
    }

    fn feature_slug(&self) -> String {
        feature_slug_for(&self.feature_dir)
    }
}

/// Last path component of the feature directory, e.g. `"001-checkout"`.
pub fn feature_slug_for(feature_dir: &Path) -> String {
    feature_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "feature".to_string())
}

/// Resolve the agent of every unit and check that each one can actually be
/// admitted. All problems are reported together.
pub fn assign_agents(
    units: &[UnitMetadata],
    config: &OrchestratorConfig,
) -> Result<BTreeMap<UnitId, String>> {
    let mut assignments = BTreeMap::new();
    let mut problems = Vec::new();

    for unit in units {
        match config.resolve_agent(unit.agent.as_deref()) {
            None => problems.push(format!("unit '{}' has no agent available", unit.id)),
            Some(name) => match config.agent(name) {
                None => problems.push(format!(
                    "unit '{}' is assigned to unknown agent '{}'",
                    unit.id, name
                )),
                Some(agent) if !agent.enabled => problems.push(format!(
                    "unit '{}' is assigned to disabled agent '{}'",
                    unit.id, name
                )),
                Some(_) => {
                    assignments.insert(unit.id.clone(), name.to_string());
                }
            },
        }
    }

    if problems.is_empty() {
        Ok(assignments)
    } else {
        Err(WpflowError::ConfigError(problems.join("; ")))
    }
}
