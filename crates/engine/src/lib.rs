//! Batch orchestration engine.
//!
//! Owns the full lifecycle of a task group: planning at submission,
//! fire-and-forget background execution over a bounded worker pool,
//! memoized uploads, staged generation with retry and chaining, live
//! progress tracking, and cooperative cancellation. Callers observe
//! outcomes only by polling [`BatchEngine::status`].

pub mod engine;
pub mod registry;
pub mod retry;

mod orchestrator;
mod stage;
mod upload;

pub use engine::{BatchEngine, SubmitReceipt};
pub use registry::{
    CancellationRegistry, EngineServices, GroupSnapshot, LogEvent, OutputGallery,
    TaskGroupRegistry, UploadCache,
};
pub use stage::{CombinationState, ImageRef};
