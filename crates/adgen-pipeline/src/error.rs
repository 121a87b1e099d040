//! Pipeline error types.

use adgen_media::MediaError;
use adgen_models::ErrorKind;
use adgen_providers::ProviderError;
use adgen_storage::StorageError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Video for job {0} was already delivered or has expired")]
    Gone(String),

    #[error("Job {0} has already finished")]
    AlreadyFinished(String),

    #[error("Job {0} has no video to deliver")]
    NotReady(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Error class reported to API callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Validation(_) => ErrorKind::ValidationError,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::JobNotFound(_) => ErrorKind::NotFound,
            PipelineError::Gone(_) => ErrorKind::Gone,
            PipelineError::AlreadyFinished(_) | PipelineError::NotReady(_) => ErrorKind::Conflict,
            PipelineError::Config(_) | PipelineError::Internal(_) => ErrorKind::InternalError,
            PipelineError::Storage(e) if e.is_client_error() => ErrorKind::ValidationError,
            PipelineError::Storage(_) => ErrorKind::InternalError,
            PipelineError::Media(MediaError::Cancelled) => ErrorKind::Cancelled,
            PipelineError::Media(_) => ErrorKind::CompositionError,
            PipelineError::Provider(e) => e.kind(),
        }
    }

    /// Whether a client-supplied file caused the failure.
    pub fn is_input_error(&self) -> bool {
        match self {
            PipelineError::Media(e) => e.is_input_error(),
            PipelineError::Provider(ProviderError::InvalidImage(_)) => true,
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            PipelineError::validation("script is required").kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            PipelineError::from(StorageError::disallowed_extension("gif")).kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            PipelineError::from(MediaError::Cancelled).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            PipelineError::from(ProviderError::Timeout {
                provider: "d-id".into(),
                attempts: 30
            })
            .kind(),
            ErrorKind::LocalTimeout
        );
        assert_eq!(PipelineError::Gone("j".into()).kind(), ErrorKind::Gone);
    }

    #[test]
    fn test_input_errors() {
        assert!(PipelineError::from(MediaError::invalid_image("truncated png")).is_input_error());
        assert!(!PipelineError::from(MediaError::internal("ffmpeg crashed")).is_input_error());
        assert_eq!(
            PipelineError::from(MediaError::invalid_image("truncated png")).kind(),
            ErrorKind::CompositionError
        );
    }
}
