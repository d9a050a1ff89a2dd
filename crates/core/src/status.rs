//! Task group lifecycle states and progress counters.
//!
//! A task group moves `Created -> Uploading -> Generating(stage 1..n) ->
//! Completed | Failed | Cancelled`. The status plus its two progress
//! counters are what a polling caller observes while a group runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GroupStatus {
    /// Registered, background execution not yet started.
    Created,
    /// Uploading the first stage's input images.
    Uploading,
    /// Executing generation stage `stage` (1-based).
    Generating { stage: usize },
    /// All stages finished with at least one success each.
    Completed,
    /// A stage-fatal condition or internal error aborted the run.
    Failed,
    /// A cancellation request was observed at a poll point.
    Cancelled,
}

impl GroupStatus {
    /// Short human-readable phrase for display.
    pub fn label(self) -> String {
        match self {
            Self::Created => "Created".to_string(),
            Self::Uploading => "Uploading".to_string(),
            Self::Generating { stage } => format!("Generating (stage {stage})"),
            Self::Completed => "Completed".to_string(),
            Self::Failed => "Failed".to_string(),
            Self::Cancelled => "Cancelled".to_string(),
        }
    }

    /// Whether the group has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A `done/total` counter pair, updated after every individual completion
/// so concurrent pollers observe live counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

impl Progress {
    /// Record one more completed unit.
    pub fn bump(&mut self) {
        self.done += 1;
    }

    /// Grow the expected total (used when a later stage adds work).
    pub fn add_total(&mut self, n: usize) {
        self.total += n;
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.done, self.total)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
