/// Domain-level error type shared across the workspace.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed planner or submission input (empty prompt groups,
    /// first-group inheritance, unsupported aspect ratio, ...).
    /// Surfaced synchronously to the submitting caller; never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invalid runtime configuration (empty credential list, zero
    /// concurrency). Raised before any work is dispatched.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A pipeline stage was left with zero usable inputs or tasks.
    /// Fatal to the whole task group.
    #[error("No valid input: {0}")]
    NoValidInput(String),

    /// An uncategorized internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}
