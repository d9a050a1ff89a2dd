//! Round-robin credential assignment across configured API accounts.
//!
//! Spreading tasks over several accounts sidesteps per-account rate
//! limits. Assignment is a pure function of the task ordinal so the same
//! ordinal always maps to the same account within a task group.

use crate::error::CoreError;

/// Assign a credential to a task by its 1-based ordinal.
///
/// Deterministic round-robin: `credentials[(ordinal - 1) % len]`. Ordinals
/// must be contiguous per task group to guarantee even distribution.
pub fn assign_credential(ordinal: usize, credentials: &[String]) -> Result<&str, CoreError> {
    if credentials.is_empty() {
        return Err(CoreError::Configuration(
            "at least one API credential is required".to_string(),
        ));
    }
    if ordinal == 0 {
        return Err(CoreError::Configuration(
            "task ordinals are 1-based".to_string(),
        ));
    }
    Ok(&credentials[(ordinal - 1) % credentials.len()])
}

/// Mask a credential for log output, keeping only the last 4 characters.
///
/// Returns `"...XXXX"` for keys long enough to stay unidentifiable, or
/// `"****"` for short keys.
pub fn credential_hint(credential: &str) -> String {
    if credential.len() >= 12 {
        format!("...{}", &credential[credential.len() - 4..])
    } else {
        "****".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
