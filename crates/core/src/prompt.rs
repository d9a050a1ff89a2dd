//! Prompt pipeline planning.
//!
//! Prompt groups use the same Multiply/Add combination algebra as image
//! groups, but over text: `Multiply` branches per line, `Add` joins lines
//! with `", "`. An `inherit` flag marks a group whose stage consumes the
//! previous stage's outputs instead of the original inputs, which
//! partitions the ordered groups into a sequence of stages.

use serde::{Deserialize, Serialize};

use crate::combine::CombineMode;
use crate::error::CoreError;

/// Separator used when joining prompt fragments.
pub const PROMPT_SEPARATOR: &str = ", ";

/// An ordered set of prompt lines plus combination mode and inheritance.
#[derive(Debug, Clone)]
pub struct PromptGroup {
    pub lines: Vec<String>,
    pub mode: CombineMode,
    /// When set, this group's stage consumes the prior stage's outputs.
    pub inherit: bool,
}

impl PromptGroup {
    pub fn multiply(lines: Vec<String>) -> Self {
        Self {
            lines,
            mode: CombineMode::Multiply,
            inherit: false,
        }
    }

    pub fn add(lines: Vec<String>) -> Self {
        Self {
            lines,
            mode: CombineMode::Add,
            inherit: false,
        }
    }

    pub fn inheriting(mut self) -> Self {
        self.inherit = true;
        self
    }

    fn usable_lines(&self) -> Vec<&str> {
        self.lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// One step of the prompt pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptStage {
    /// 1-based ordinal of this stage.
    pub index: usize,
    /// One suffix per combination of the stage's prompt groups.
    pub suffixes: Vec<String>,
    /// When set, the stage's prompt replaces the carried-forward prompt
    /// instead of appending to it. True iff the stage inherits and every
    /// constituent group uses `Multiply` mode.
    pub replace_prompt: bool,
}

/// Partition prompt groups into stages and compute each stage's suffixes.
///
/// Consecutive non-inheriting groups collapse into one stage; an
/// inheriting group flushes any pending groups and forms its own stage.
/// Non-inheriting groups with no usable lines are skipped. Stages that end
/// up with zero suffixes are dropped; zero surviving stages is an error.
pub fn plan_prompt_stages(groups: &[PromptGroup]) -> Result<Vec<PromptStage>, CoreError> {
    for (position, group) in groups.iter().enumerate() {
        if group.inherit {
            if position == 0 {
                return Err(CoreError::Validation(
                    "the first prompt group cannot inherit from a previous stage".to_string(),
                ));
            }
            if group.usable_lines().is_empty() {
                return Err(CoreError::Validation(format!(
                    "inheriting prompt group {} has no prompts",
                    position + 1
                )));
            }
        }
    }

    // Partition into stage group-sets, inheriting groups standing alone.
    let mut stage_sets: Vec<(Vec<&PromptGroup>, bool)> = Vec::new();
    let mut pending: Vec<&PromptGroup> = Vec::new();
    for group in groups {
        if group.inherit {
            if !pending.is_empty() {
                stage_sets.push((std::mem::take(&mut pending), false));
            }
            stage_sets.push((vec![group], true));
        } else if !group.usable_lines().is_empty() {
            pending.push(group);
        }
    }
    if !pending.is_empty() {
        stage_sets.push((pending, false));
    }

    let mut stages = Vec::new();
    for (set, inheriting) in stage_sets {
        let suffixes = combine_suffixes(&set);
        if suffixes.is_empty() {
            continue;
        }
        let replace_prompt = inheriting && set.iter().all(|g| g.mode == CombineMode::Multiply);
        stages.push(PromptStage {
            index: stages.len() + 1,
            suffixes,
            replace_prompt,
        });
    }

    if stages.is_empty() {
        return Err(CoreError::Validation(
            "prompt groups produced no executable stages".to_string(),
        ));
    }
    Ok(stages)
}

/// Combine one stage's groups into suffix strings.
///
/// Within a group: `Multiply` branches per line, `Add` joins all lines
/// with [`PROMPT_SEPARATOR`]. Across groups the options combine as a
/// Cartesian product, concatenated with the same separator.
fn combine_suffixes(set: &[&PromptGroup]) -> Vec<String> {
    let option_sets: Vec<Vec<String>> = set
        .iter()
        .map(|group| {
            let lines = group.usable_lines();
            match group.mode {
                CombineMode::Multiply => lines.iter().map(|l| l.to_string()).collect(),
                CombineMode::Add => {
                    if lines.is_empty() {
                        Vec::new()
                    } else {
                        vec![lines.join(PROMPT_SEPARATOR)]
                    }
                }
            }
        })
        .filter(|options: &Vec<String>| !options.is_empty())
        .collect();

    if option_sets.is_empty() {
        return Vec::new();
    }

    let mut suffixes = vec![String::new()];
    for options in &option_sets {
        let mut next = Vec::with_capacity(suffixes.len() * options.len());
        for prefix in &suffixes {
            for option in options {
                if prefix.is_empty() {
                    next.push(option.clone());
                } else {
                    next.push(format!("{prefix}{PROMPT_SEPARATOR}{option}"));
                }
            }
        }
        suffixes = next;
    }
    suffixes
}

/// Compose the final prompt for one task from the carried prompt and the
/// stage suffix.
///
/// Replace-mode stages overwrite the carried prompt; otherwise the suffix
/// is appended with [`PROMPT_SEPARATOR`] when both sides are non-empty.
/// Returns `None` when the composed prompt is empty, which the executor
/// treats as "skip this task" rather than a failure.
pub fn compose_prompt(carried: &str, suffix: &str, replace: bool) -> Option<String> {
    let carried = carried.trim();
    let suffix = suffix.trim();

    let composed = if replace {
        suffix.to_string()
    } else if carried.is_empty() {
        suffix.to_string()
    } else if suffix.is_empty() {
        carried.to_string()
    } else {
        format!("{carried}{PROMPT_SEPARATOR}{suffix}")
    };

    if composed.is_empty() {
        None
    } else {
        Some(composed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
