//! Pipeline configuration.

use std::time::Duration;

use adgen_models::{parse_color, BackgroundFallback, BackgroundImageFit, PollPolicy, Rgb};

use crate::error::{PipelineError, PipelineResult};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Longest accepted script, in characters
    pub max_script_chars: usize,
    /// Color used when the client sends none
    pub default_background_color: Rgb,
    /// What to do with a background image of a disallowed type
    pub background_fallback: BackgroundFallback,
    /// How an uploaded background photo fills the canvas
    pub background_image_fit: BackgroundImageFit,
    /// Background jobs allowed to run at once; the rest wait queued
    pub max_concurrent_jobs: usize,
    /// How long an unclaimed video is kept
    pub artifact_ttl: Duration,
    /// How long finished job records stay queryable
    pub record_ttl: Duration,
    /// Sweeper period
    pub sweep_interval: Duration,
    /// FFmpeg is killed after this many seconds
    pub render_timeout_secs: u64,
    /// Avatar job poll ceiling
    pub avatar_poll: PollPolicy,
    /// Per-request timeout for fetching provider-hosted media
    pub download_timeout: Duration,
    /// Retries for a failed media download
    pub download_retries: u32,
    /// Backoff before the first download retry
    pub download_backoff: Duration,
    /// Gap between the avatar inset and the canvas edge, in pixels
    pub avatar_inset_margin: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_script_chars: 500,
            default_background_color: Rgb::new(211, 211, 211),
            background_fallback: BackgroundFallback::Reject,
            background_image_fit: BackgroundImageFit::Stretch,
            max_concurrent_jobs: 2,
            artifact_ttl: Duration::from_secs(600),
            record_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
            render_timeout_secs: 600,
            avatar_poll: PollPolicy::avatar(),
            download_timeout: Duration::from_secs(120),
            download_retries: 3,
            download_backoff: Duration::from_millis(500),
            avatar_inset_margin: 40,
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    ///
    /// Unparseable numbers fall back to defaults; an invalid color or
    /// fallback policy is a configuration error.
    pub fn from_env() -> PipelineResult<Self> {
        let default = Self::default();

        let default_background_color = match std::env::var("DEFAULT_BACKGROUND_COLOR") {
            Ok(value) if !value.trim().is_empty() => parse_color(&value)
                .map_err(|e| PipelineError::config(format!("DEFAULT_BACKGROUND_COLOR: {e}")))?,
            _ => default.default_background_color,
        };

        let background_fallback = match std::env::var("BACKGROUND_FALLBACK") {
            Ok(value) if !value.trim().is_empty() => BackgroundFallback::parse(&value).ok_or_else(|| {
                PipelineError::config(format!(
                    "BACKGROUND_FALLBACK must be 'reject' or 'color', got {value:?}"
                ))
            })?,
            _ => default.background_fallback,
        };

        let background_image_fit = match std::env::var("BACKGROUND_IMAGE_FIT") {
            Ok(value) if !value.trim().is_empty() => BackgroundImageFit::parse(&value).ok_or_else(|| {
                PipelineError::config(format!(
                    "BACKGROUND_IMAGE_FIT must be 'stretch' or 'cover', got {value:?}"
                ))
            })?,
            _ => default.background_image_fit,
        };

        Ok(Self {
            max_script_chars: env_parse("MAX_SCRIPT_CHARS")
                .filter(|n| *n > 0)
                .unwrap_or(default.max_script_chars),
            default_background_color,
            background_fallback,
            background_image_fit,
            max_concurrent_jobs: env_parse("PIPELINE_MAX_CONCURRENT_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(default.max_concurrent_jobs),
            artifact_ttl: env_parse("ARTIFACT_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.artifact_ttl),
            record_ttl: env_parse("JOB_RECORD_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.record_ttl),
            sweep_interval: env_parse("PIPELINE_SWEEP_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(default.sweep_interval),
            render_timeout_secs: env_parse("RENDER_TIMEOUT_SECS").unwrap_or(default.render_timeout_secs),
            avatar_poll: PollPolicy::from_env("AVATAR", default.avatar_poll),
            download_timeout: env_parse("DOWNLOAD_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(default.download_timeout),
            download_retries: env_parse("DOWNLOAD_MAX_RETRIES").unwrap_or(default.download_retries),
            download_backoff: env_parse("DOWNLOAD_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(default.download_backoff),
            avatar_inset_margin: env_parse("AVATAR_INSET_MARGIN").unwrap_or(default.avatar_inset_margin),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}
