//! Generation pipeline for the AdGen backend.
//!
//! This crate provides:
//! - Upfront request validation (nothing is stored or sent before it passes)
//! - The orchestrator that turns a validated request into a rendered video
//! - A registry running generations as background jobs with status, cancel and
//!   one-shot artifact delivery
//! - Structured job logging and retry helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use logging::JobLogger;
pub use orchestrator::{EventFn, JobContext, Orchestrator, PipelineEvent, RenderedVideo, Stage};
pub use registry::{JobRegistry, JobSnapshot, SweepStats};
pub use retry::{retry_async, RetryConfig, RetryResult};
pub use validation::{validate, GenerationRequest, ImageUpload, UploadDraft, UploadedFile, ValidationLimits};
