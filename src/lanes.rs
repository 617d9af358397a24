// src/lanes.rs

//! Externally visible lane of each work unit.
//!
//! The processor reports every phase change here before updating its own
//! record, so a reader of the lanes never sees a unit further along than
//! the lane says.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use crate::errors::{Result, WpflowError};
use crate::fs::FileSystem;
use crate::types::Lane;

/// Sink for lane transitions and review feedback.
pub trait LaneStore: Send + Sync {
    fn transition_lane(&self, unit_id: &str, lane: Lane) -> Result<()>;

    /// Attach reviewer feedback to a rejected unit.
    fn record_review_feedback(&self, unit_id: &str, feedback: &str) -> Result<()>;
}

/// Lane store keeping one small file per unit under `<control_dir>/lanes`.
///
/// `<unit>` holds the lane name; `<unit>.feedback` accumulates feedback from
/// every rejected review.
#[derive(Debug, Clone)]
pub struct FileLaneStore {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
}

impl FileLaneStore {
    pub fn new(fs: Arc<dyn FileSystem>, control_dir: &Path) -> Self {
        Self {
            fs,
            dir: control_dir.join("lanes"),
        }
    }

    fn lane_path(&self, unit_id: &str) -> PathBuf {
        self.dir.join(unit_id)
    }

    fn feedback_path(&self, unit_id: &str) -> PathBuf {
        self.dir.join(format!("{unit_id}.feedback"))
    }

    /// Lane last written for `unit_id`, if any.
    pub fn current_lane(&self, unit_id: &str) -> Result<Option<Lane>> {
        let path = self.lane_path(unit_id);
        if !self.fs.is_file(&path) {
            return Ok(None);
        }
        let raw = self.fs.read_to_string(&path)?;
        raw.trim()
            .parse::<Lane>()
            .map(Some)
            .map_err(|e| WpflowError::StateError(format!("lane file {:?}: {}", path, e)))
    }

    pub fn feedback(&self, unit_id: &str) -> Result<Option<String>> {
        let path = self.feedback_path(unit_id);
        if !self.fs.is_file(&path) {
            return Ok(None);
        }
        Ok(Some(self.fs.read_to_string(&path)?))
    }
}

impl LaneStore for FileLaneStore {
    fn transition_lane(&self, unit_id: &str, lane: Lane) -> Result<()> {
        let path = self.lane_path(unit_id);
        self.fs
            .write(&path, format!("{lane}\n").as_bytes())
            .with_context(|| format!("moving unit '{unit_id}' to lane {lane}"))?;
        debug!(unit = %unit_id, %lane, "lane updated");
        Ok(())
    }

    fn record_review_feedback(&self, unit_id: &str, feedback: &str) -> Result<()> {
        let path = self.feedback_path(unit_id);
        let mut content = if self.fs.is_file(&path) {
            self.fs.read_to_string(&path)?
        } else {
            String::new()
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(feedback.trim_end());
        content.push('\n');

        self.fs
            .write(&path, content.as_bytes())
            .with_context(|| format!("recording review feedback for unit '{unit_id}'"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn store() -> (MockFileSystem, FileLaneStore) {
        let fs = MockFileSystem::new();
        let lanes = FileLaneStore::new(Arc::new(fs.clone()), Path::new("/proj/.wpflow"));
        (fs, lanes)
    }

    #[test]
    fn transition_overwrites_lane_file() {
        let (fs, lanes) = store();
        assert_eq!(lanes.current_lane("WP01").unwrap(), None);

        lanes.transition_lane("WP01", Lane::Doing).unwrap();
        lanes.transition_lane("WP01", Lane::ForReview).unwrap();

        assert_eq!(lanes.current_lane("WP01").unwrap(), Some(Lane::ForReview));
        assert_eq!(fs.paths(), vec![PathBuf::from("/proj/.wpflow/lanes/WP01")]);
    }

    #[test]
    fn feedback_accumulates_across_rejections() {
        let (_fs, lanes) = store();
        lanes.record_review_feedback("WP02", "missing tests").unwrap();
        lanes.record_review_feedback("WP02", "rename the flag\n").unwrap();

        assert_eq!(
            lanes.feedback("WP02").unwrap().as_deref(),
            Some("missing tests\nrename the flag\n")
        );
        assert_eq!(lanes.feedback("WP01").unwrap(), None);
    }

    #[test]
    fn garbage_lane_file_is_a_state_error() {
        let (fs, lanes) = store();
        fs.add_file("/proj/.wpflow/lanes/WP03", "somewhere");
        assert!(matches!(
            lanes.current_lane("WP03"),
            Err(WpflowError::StateError(_))
        ));
    }
}
