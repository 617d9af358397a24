// src/state/store.rs

//! Durable storage of the [`Run`] record.
//!
//! The whole run is rewritten after every transition. Writes go to a
//! temporary file that is then renamed over the real one, so a crash
//! mid-write leaves the previous state intact.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::{Result, WpflowError};
use crate::fs::FileSystem;
use crate::state::model::Run;

/// File name of the run record inside the control directory.
pub const STATE_FILE_NAME: &str = "orchestration-state.json";

#[derive(Debug, Clone)]
pub struct StateStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl StateStore {
    /// Store at `<control_dir>/orchestration-state.json`.
    pub fn new(fs: Arc<dyn FileSystem>, control_dir: &Path) -> Self {
        Self::at_path(fs, control_dir.join(STATE_FILE_NAME))
    }

    pub fn at_path(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, run: &Run) -> Result<()> {
        let json = serde_json::to_vec_pretty(run)?;
        let tmp_path = self.path.with_extension("json.tmp");

        self.fs.write(&tmp_path, &json)?;
        self.fs.rename(&tmp_path, &self.path)?;

        debug!(
            path = %self.path.display(),
            run_id = %run.run_id,
            completed = run.units_completed,
            "run state persisted"
        );
        Ok(())
    }

    /// Load the persisted run, or `None` when no state file exists.
    ///
    /// A file that does not parse (including unknown status values) or that
    /// violates the record invariants is an error: resuming from it would be
    /// guesswork.
    pub fn load(&self) -> Result<Option<Run>> {
        if !self.fs.is_file(&self.path) {
            return Ok(None);
        }

        let contents = self.fs.read_to_string(&self.path)?;
        let run: Run = serde_json::from_str(&contents).map_err(|e| {
            WpflowError::StateError(format!(
                "corrupt state file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let problems = run.invariant_violations();
        if !problems.is_empty() {
            return Err(WpflowError::StateError(format!(
                "inconsistent state file {}: {}",
                self.path.display(),
                problems.join("; ")
            )));
        }

        info!(
            path = %self.path.display(),
            run_id = %run.run_id,
            "loaded persisted run state"
        );
        Ok(Some(run))
    }

    /// Remove the state file if present.
    pub fn clear(&self) -> Result<()> {
        if self.fs.is_file(&self.path) {
            self.fs.remove_file(&self.path)?;
            debug!(path = %self.path.display(), "run state cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFileSystem;
    use crate::fs::mock::MockFileSystem;
    use crate::state::model::{UnitExecution, UnitStatus};
    use chrono::Utc;

    fn sample_run() -> Run {
        let mut run = Run::new(
            "001-checkout",
            ["WP01", "WP02", "WP03"].iter().map(|s| s.to_string()),
        );
        let now = Utc::now();

        let wp01 = run.units.get_mut("WP01").unwrap();
        wp01.begin_implementation(now).unwrap();
        wp01.complete_implementation(now).unwrap();
        wp01.begin_review(now).unwrap();
        wp01.approve(now).unwrap();

        let wp02 = run.units.get_mut("WP02").unwrap();
        wp02.begin_implementation(now).unwrap();
        wp02.fail("agent exited with code 2").unwrap();

        run.recompute_totals();
        run
    }

    #[test]
    fn save_then_load_reproduces_the_run_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(Arc::new(RealFileSystem), &dir.path().join(".wpflow"));
        let run = sample_run();

        store.save(&run).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded, run);
        for (id, unit) in run.units.iter() {
            let other = loaded.unit(id).unwrap();
            assert_eq!(other.status, unit.status);
            assert_eq!(other.implementation_started, unit.implementation_started);
            assert_eq!(other.implementation_completed, unit.implementation_completed);
            assert_eq!(other.review_started, unit.review_started);
            assert_eq!(other.review_completed, unit.review_completed);
            assert_eq!(other.last_error, unit.last_error);
        }
        assert!(!dir.path().join(".wpflow/orchestration-state.json.tmp").exists());
    }

    #[test]
    fn missing_file_loads_as_none_and_clear_is_idempotent() {
        let fs = MockFileSystem::new();
        let store = StateStore::new(Arc::new(fs.clone()), Path::new(".wpflow"));

        assert!(store.load().unwrap().is_none());
        store.save(&sample_run()).unwrap();
        assert!(store.load().unwrap().is_some());

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(fs.paths().is_empty());
    }

    #[test]
    fn unknown_status_is_rejected_on_load() {
        let fs = MockFileSystem::new();
        let store = StateStore::new(Arc::new(fs.clone()), Path::new(".wpflow"));
        let run = sample_run();
        let json = serde_json::to_string(&run)
            .unwrap()
            .replace("\"completed\"", "\"shipped\"");
        fs.add_file(store.path(), json);

        match store.load() {
            Err(WpflowError::StateError(msg)) => assert!(msg.contains("corrupt state file")),
            other => panic!("expected StateError, got {other:?}"),
        }
    }

    #[test]
    fn failed_unit_without_error_is_rejected_on_load() {
        let fs = MockFileSystem::new();
        let store = StateStore::new(Arc::new(fs.clone()), Path::new(".wpflow"));
        let mut run = sample_run();
        let mut broken = UnitExecution::new("WP03");
        broken.status = UnitStatus::Failed;
        run.units.insert("WP03".to_string(), broken);
        fs.add_file(store.path(), serde_json::to_vec(&run).unwrap());

        assert!(matches!(store.load(), Err(WpflowError::StateError(_))));
    }
}
