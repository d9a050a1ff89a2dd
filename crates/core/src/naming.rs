//! Deterministic task and output-file naming.
//!
//! Names are derived from the group id, stage ordinal, combination index,
//! and prompt index so concurrently running groups never collide on disk.
//! First-stage names also carry the source image stem for readability.

use uuid::Uuid;

/// Short display form of a group id (first 8 hex characters).
pub fn short_group_id(group_id: &Uuid) -> String {
    group_id.simple().to_string()[..8].to_string()
}

/// Build the unique name for one generation task.
///
/// Convention: `task_{gid8}_s{stage}_c{combo}_p{prompt}{_stem}`.
///
/// # Examples
///
/// ```
/// use banana_core::naming::task_name;
/// use uuid::Uuid;
///
/// let gid = Uuid::nil();
/// assert_eq!(task_name(&gid, 1, 2, 3, Some("portrait A")), "task_00000000_s1_c2_p3_portrait_a");
/// assert_eq!(task_name(&gid, 2, 1, 1, None), "task_00000000_s2_c1_p1");
/// ```
pub fn task_name(
    group_id: &Uuid,
    stage_index: usize,
    combo_index: usize,
    prompt_index: usize,
    source_stem: Option<&str>,
) -> String {
    let mut name = format!(
        "task_{}_s{stage_index}_c{combo_index}_p{prompt_index}",
        short_group_id(group_id),
    );
    if let Some(stem) = source_stem {
        let stem = sanitize_stem(stem);
        if !stem.is_empty() {
            name.push('_');
            name.push_str(&stem);
        }
    }
    name
}

/// Output filename for a task's saved artifact.
pub fn output_filename(task_name: &str, extension: &str) -> String {
    format!("{task_name}.{extension}")
}

/// Reduce a source file stem to lowercase alphanumerics and underscores.
pub fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
