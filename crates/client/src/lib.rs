//! HTTP collaborators for the batch generation engine.
//!
//! Defines the two external seams the orchestration core depends on --
//! the [`AssetStore`](asset_store::AssetStore) that turns local files into
//! remote references, and the [`GenerationService`](draw::GenerationService)
//! that runs the actual image generation -- plus reqwest-backed
//! implementations of both against the vendor API.

pub mod asset_store;
pub mod draw;

pub use asset_store::{AssetStore, CdnAssetStore, UploadError};
pub use draw::{
    DrawApi, GenerationError, GenerationRequest, GenerationResult, GenerationService,
};
