// src/types.rs

//! Small vocabulary types shared by the scheduler and its collaborators.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical work unit identifier (e.g. `"WP01"`).
pub type UnitId = String;

/// Externally visible lane of a work unit.
///
/// Lanes are what other tools see; the scheduler's own [`UnitStatus`] is
/// finer grained. The lane is always written before the in-memory status.
///
/// [`UnitStatus`]: crate::state::UnitStatus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    Planned,
    Doing,
    ForReview,
    Done,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Planned => "planned",
            Lane::Doing => "doing",
            Lane::ForReview => "for_review",
            Lane::Done => "done",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lane {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "planned" => Ok(Lane::Planned),
            "doing" => Ok(Lane::Doing),
            "for_review" => Ok(Lane::ForReview),
            "done" => Ok(Lane::Done),
            other => Err(format!(
                "invalid lane: {other} (expected planned, doing, for_review or done)"
            )),
        }
    }
}

/// Verdict of the review phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    Approved,
    /// The unit goes back to the backlog; optional feedback is handed to the
    /// lane store so the next implementation pass can see it.
    Rejected { feedback: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_parses_its_own_display_form() {
        for lane in [Lane::Planned, Lane::Doing, Lane::ForReview, Lane::Done] {
            assert_eq!(lane.to_string().parse::<Lane>(), Ok(lane));
        }
        assert!("reviewing".parse::<Lane>().is_err());
    }
}
