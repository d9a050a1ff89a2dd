//! Saved generation results and their metadata.
//!
//! Every successful task persists one primary image plus a metadata record
//! describing where it came from. The provenance shape differs by task
//! kind, so it is a tagged variant selected at construction time rather
//! than a free-form map.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance of an output image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactSource {
    /// Generated from a single input image.
    SingleImage { source: String },
    /// Generated from a fixed bundle of input images.
    ImageSet { sources: Vec<String> },
    /// Generated from a previous stage's output; carries the full prompt
    /// lineage applied along the chain.
    Staged { prompt_history: Vec<String> },
}

impl ArtifactSource {
    /// Pick the provenance variant for a first-stage task.
    pub fn from_inputs(mut sources: Vec<String>) -> Self {
        if sources.len() == 1 {
            Self::SingleImage {
                source: sources.remove(0),
            }
        } else {
            Self::ImageSet { sources }
        }
    }
}

/// Metadata recorded alongside every saved output image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub group_id: Uuid,
    pub task_name: String,
    /// The literal prompt sent to the generation service.
    pub prompt: String,
    pub model: String,
    pub aspect_ratio: String,
    /// 1-based stage this artifact was produced in.
    pub stage_index: usize,
    /// Attempt number of the successful generation call (1 = first try).
    pub retry_attempts: u32,
    pub upload_secs: f64,
    pub api_secs: f64,
    pub total_secs: f64,
    pub created_at: DateTime<Utc>,
    pub source: ArtifactSource,
}

/// A saved output image plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputArtifact {
    /// Where the image was written on disk.
    pub path: PathBuf,
    /// Remote URL the image was downloaded from.
    pub remote_url: String,
    pub metadata: ArtifactMetadata,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
