//! Image compositing and FFmpeg video rendering.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeouts via tokio
//! - FFprobe media inspection
//! - Still-frame compositing (background + placed foregrounds)
//! - Layered video rendering driven by a [`CompositionSpec`](adgen_models::CompositionSpec)

pub mod command;
pub mod compositor;
pub mod error;
pub mod frame;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use compositor::{FfmpegCompositor, ProgressFn, RenderJob, RenderOutput, VideoRenderer};
pub use error::{MediaError, MediaResult};
pub use frame::{Backdrop, ImageCompositor, Placement};
pub use probe::{probe_media, MediaInfo};
pub use progress::FfmpegProgress;
