//! Task count estimation for a planned batch.
//!
//! Computed synchronously at submission time so the caller gets an
//! immediate estimate alongside the group id. Stage chaining assumes every
//! task succeeds (1:1); actual execution may yield fewer inputs for later
//! stages when tasks fail.

use serde::{Deserialize, Serialize};

use crate::prompt::PromptStage;

/// Planned work for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEstimate {
    /// 1-based stage ordinal.
    pub stage_index: usize,
    /// Number of input combinations feeding this stage.
    pub input_count: usize,
    /// Number of prompt suffixes applied per input.
    pub prompt_count: usize,
    /// `input_count * prompt_count`.
    pub task_count: usize,
}

/// Planned work for the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEstimate {
    /// Sum of task counts over all stages.
    pub total_tasks: usize,
    /// Expected output count of the final stage (assuming no failures).
    pub final_input_count: usize,
    pub stages: Vec<StageEstimate>,
}

/// Estimate per-stage and total task counts for a stage plan.
///
/// The first stage's input count is the initial combination count; each
/// subsequent stage consumes the previous stage's task count.
pub fn estimate_batch(initial_combo_count: usize, stages: &[PromptStage]) -> BatchEstimate {
    let mut input_count = initial_combo_count;
    let mut total_tasks = 0;
    let mut per_stage = Vec::with_capacity(stages.len());

    for stage in stages {
        let task_count = input_count * stage.suffixes.len();
        per_stage.push(StageEstimate {
            stage_index: stage.index,
            input_count,
            prompt_count: stage.suffixes.len(),
            task_count,
        });
        total_tasks += task_count;
        input_count = task_count;
    }

    BatchEstimate {
        total_tasks,
        final_input_count: input_count,
        stages: per_stage,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
