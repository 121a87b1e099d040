//! HTTP handlers.

pub mod generate;
pub mod health;
pub mod jobs;

pub use generate::generate_video;
pub use health::{health, ready};
pub use jobs::{cancel_job, download_job_video, get_job, submit_job};
