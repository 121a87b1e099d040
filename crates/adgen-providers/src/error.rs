//! Provider client error types.

use adgen_models::{ErrorKind, JobStatus};
use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider configuration error: {0}")]
    Config(String),

    #[error("{provider} rejected the submission: {message}")]
    Submission { provider: String, message: String },

    #[error("{provider} status read failed: {message}")]
    Transient { provider: String, message: String },

    #[error("{provider} reported job {status}: {detail}")]
    TerminalFailure {
        provider: String,
        status: JobStatus,
        detail: String,
    },

    #[error("{provider} job {job_id} completed without a result URL")]
    MissingResult { provider: String, job_id: String },

    #[error("{provider} job still pending after {attempts} polls")]
    Timeout { provider: String, attempts: u32 },

    #[error("Job abandoned by caller")]
    Cancelled,

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Download rejected: {0}")]
    DownloadRejected(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn submission(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Submission {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    pub fn transient(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transient {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient { .. }
                | ProviderError::Timeout { .. }
                | ProviderError::Download(_)
                | ProviderError::Network(_)
        )
    }

    /// Error class reported to API callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Submission { .. } => ErrorKind::UpstreamSubmissionError,
            ProviderError::Transient { .. }
            | ProviderError::Network(_)
            | ProviderError::Json(_)
            | ProviderError::Download(_) => ErrorKind::UpstreamTransientError,
            ProviderError::TerminalFailure { .. }
            | ProviderError::MissingResult { .. }
            | ProviderError::DownloadRejected(_) => ErrorKind::UpstreamTerminalFailure,
            ProviderError::Timeout { .. } => ErrorKind::LocalTimeout,
            ProviderError::Cancelled => ErrorKind::Cancelled,
            ProviderError::InvalidImage(_) => ErrorKind::CompositionError,
            ProviderError::Config(_) | ProviderError::Io(_) => ErrorKind::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_distinct_from_provider_failure() {
        let timeout = ProviderError::Timeout {
            provider: "d-id".into(),
            attempts: 30,
        };
        let failed = ProviderError::TerminalFailure {
            provider: "d-id".into(),
            status: JobStatus::Failed,
            detail: "face not detected".into(),
        };

        assert_eq!(timeout.kind(), ErrorKind::LocalTimeout);
        assert!(timeout.is_retryable());
        assert_eq!(failed.kind(), ErrorKind::UpstreamTerminalFailure);
        assert!(!failed.is_retryable());
        assert!(failed.to_string().contains("face not detected"));
    }

    #[test]
    fn test_rejected_download_is_terminal() {
        let rejected = ProviderError::DownloadRejected("403 Forbidden for https://cdn/v.mp4".into());
        assert!(!rejected.is_retryable());
        assert_eq!(rejected.kind(), ErrorKind::UpstreamTerminalFailure);
        assert!(!rejected.kind().is_retryable());

        let dropped = ProviderError::Download("connection reset".into());
        assert!(dropped.is_retryable());
        assert_eq!(dropped.kind(), ErrorKind::UpstreamTransientError);
    }

    #[test]
    fn test_submission_is_not_retried() {
        let err = ProviderError::submission("play.ht", "401 Unauthorized");
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), ErrorKind::UpstreamSubmissionError);
    }
}
