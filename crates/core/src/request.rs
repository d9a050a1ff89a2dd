//! Batch submission requests and synchronous planning.
//!
//! `BatchRequest::plan` runs every validation rule and the combination /
//! prompt planners before any background work starts, so a malformed
//! submission is rejected in the calling context and never spawns a task
//! group.

use std::path::PathBuf;

use crate::combine::{combine_assets, ImageGroup};
use crate::error::CoreError;
use crate::estimation::{estimate_batch, BatchEstimate};
use crate::prompt::{plan_prompt_stages, PromptGroup, PromptStage};

/// Aspect ratios accepted by the generation service.
pub const SUPPORTED_ASPECT_RATIOS: &[&str] = &[
    "auto", "1:1", "16:9", "9:16", "4:3", "3:4", "3:2", "2:3", "5:4", "4:5", "21:9",
];

/// Upper bound on the worker pool size.
pub const MAX_CONCURRENCY: usize = 20;

/// Validate that an aspect ratio string is one of the supported options.
pub fn validate_aspect_ratio(aspect_ratio: &str) -> Result<(), CoreError> {
    if SUPPORTED_ASPECT_RATIOS.contains(&aspect_ratio) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Unsupported aspect ratio: '{aspect_ratio}'. Supported options: {}",
            SUPPORTED_ASPECT_RATIOS.join(", ")
        )))
    }
}

/// Everything needed to run one batch of generation work.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub image_groups: Vec<ImageGroup>,
    pub prompt_groups: Vec<PromptGroup>,
    /// Bearer credentials, assigned round-robin across tasks.
    pub credentials: Vec<String>,
    /// Worker pool size for uploads and generation calls.
    pub concurrency: usize,
    pub model: String,
    pub aspect_ratio: String,
    /// Maximum attempts per call (1 = no retries).
    pub max_retries: u32,
    /// Directory output images are written into.
    pub output_dir: PathBuf,
}

/// The fully validated execution plan for one batch.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// Concrete image combinations feeding stage 1.
    pub combinations: Vec<Vec<PathBuf>>,
    pub stages: Vec<PromptStage>,
    pub estimate: BatchEstimate,
}

impl BatchRequest {
    /// Validate the request and compute its execution plan.
    ///
    /// Returns the first violated rule as a [`CoreError`]; nothing is
    /// dispatched on failure.
    pub fn plan(&self) -> Result<BatchPlan, CoreError> {
        if self.credentials.is_empty() {
            return Err(CoreError::Configuration(
                "at least one API credential is required".to_string(),
            ));
        }
        if self.credentials.iter().any(|c| c.trim().is_empty()) {
            return Err(CoreError::Configuration(
                "API credentials must not be blank".to_string(),
            ));
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(CoreError::Configuration(format!(
                "concurrency must be between 1 and {MAX_CONCURRENCY}"
            )));
        }
        if self.max_retries == 0 {
            return Err(CoreError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(CoreError::Validation("model must not be empty".to_string()));
        }
        validate_aspect_ratio(&self.aspect_ratio)?;

        let combinations = combine_assets(&self.image_groups);
        if combinations.is_empty() {
            return Err(CoreError::Validation(
                "at least one input image is required".to_string(),
            ));
        }

        let stages = plan_prompt_stages(&self.prompt_groups)?;
        let estimate = estimate_batch(combinations.len(), &stages);

        Ok(BatchPlan {
            combinations,
            stages,
            estimate,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
