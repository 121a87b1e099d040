//! Shared data models for the AdGen backend.
//!
//! This crate provides Serde-serializable types for:
//! - Asset and job identifiers
//! - Remote generation jobs and their status
//! - Colors, canvases and composition specs
//! - Encoding defaults and poll policies
//! - The uniform error envelope returned by the API

pub mod asset;
pub mod color;
pub mod composition;
pub mod encoding;
pub mod error;
pub mod job;
pub mod poll;
pub mod request;

// Re-export common types
pub use asset::{AssetId, AssetKind};
pub use color::{parse_color, ColorError, Rgb, DEFAULT_BACKGROUND_COLOR};
pub use composition::{
    Anchor, AudioSource, BackgroundImageFit, BackgroundSpec, CanvasPreset, CanvasSize,
    CompositionSpec, FitBox, Layer, LayerSource,
};
pub use encoding::EncodingConfig;
pub use error::{ErrorBody, ErrorEnvelope, ErrorKind};
pub use job::{GenerationJob, JobId, JobStatus};
pub use poll::PollPolicy;
pub use request::{BackgroundFallback, GenerationMode};
