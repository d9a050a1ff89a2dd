//! Image combination planning.
//!
//! Input images arrive in ordered groups (pages), each with a combination
//! mode. `Multiply` groups branch the Cartesian product (one asset per
//! branch); `Add` groups contribute their whole bundle to every branch
//! without multiplying the count. Empty groups contribute nothing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How a group's elements take part in combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// Each element becomes a separate branch of the product.
    Multiply,
    /// All elements merge into one fixed contribution.
    Add,
}

/// An ordered set of input images plus its combination mode.
#[derive(Debug, Clone)]
pub struct ImageGroup {
    pub assets: Vec<PathBuf>,
    pub mode: CombineMode,
}

impl ImageGroup {
    pub fn multiply(assets: Vec<PathBuf>) -> Self {
        Self {
            assets,
            mode: CombineMode::Multiply,
        }
    }

    pub fn add(assets: Vec<PathBuf>) -> Self {
        Self {
            assets,
            mode: CombineMode::Add,
        }
    }
}

/// Compute the concrete image combinations across all groups.
///
/// Empty groups are dropped. Each remaining `Multiply` group contributes
/// one of its assets per branch; each `Add` group contributes all of its
/// assets as a unit. The Cartesian product runs in group order and every
/// product tuple is flattened into one combination, so the result count is
/// the product of the `Multiply` group sizes.
///
/// Zero non-empty groups yield an empty result; the caller must treat that
/// as "no input".
pub fn combine_assets(groups: &[ImageGroup]) -> Vec<Vec<PathBuf>> {
    let branch_sets: Vec<Vec<Vec<PathBuf>>> = groups
        .iter()
        .filter(|g| !g.assets.is_empty())
        .map(|g| match g.mode {
            CombineMode::Multiply => g.assets.iter().map(|a| vec![a.clone()]).collect(),
            CombineMode::Add => vec![g.assets.clone()],
        })
        .collect();

    if branch_sets.is_empty() {
        return Vec::new();
    }

    let mut combinations: Vec<Vec<PathBuf>> = vec![Vec::new()];
    for options in &branch_sets {
        let mut next = Vec::with_capacity(combinations.len() * options.len());
        for combo in &combinations {
            for option in options {
                let mut grown = combo.clone();
                grown.extend(option.iter().cloned());
                next.push(grown);
            }
        }
        combinations = next;
    }
    combinations
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
