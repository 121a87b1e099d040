//! Uniform error envelope.
//!
//! Every failed request, synchronous or not, is reported as
//! `{"error": {"kind": "...", "message": "..."}}`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing input; nothing was stored or sent upstream
    ValidationError,
    /// A provider accepted nothing usable
    UpstreamSubmissionError,
    /// A single provider read failed
    UpstreamTransientError,
    /// A provider reported the job as failed or cancelled
    UpstreamTerminalFailure,
    /// The local poll ceiling was exhausted
    LocalTimeout,
    /// Local media processing failed
    CompositionError,
    /// The caller abandoned the job
    Cancelled,
    NotFound,
    Gone,
    Conflict,
    RateLimited,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::UpstreamSubmissionError => "upstream_submission_error",
            ErrorKind::UpstreamTransientError => "upstream_transient_error",
            ErrorKind::UpstreamTerminalFailure => "upstream_terminal_failure",
            ErrorKind::LocalTimeout => "local_timeout",
            ErrorKind::CompositionError => "composition_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Gone => "gone",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// Whether resubmitting the same input may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::LocalTimeout | ErrorKind::UpstreamTransientError | ErrorKind::RateLimited
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inner error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Top-level error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                kind,
                message: message.into(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let envelope = ErrorEnvelope::new(ErrorKind::LocalTimeout, "gave up after 30 polls");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["error"]["kind"], "local_timeout");
        assert_eq!(value["error"]["message"], "gave up after 30 polls");
    }

    #[test]
    fn test_serde_name_matches_as_str() {
        for kind in [
            ErrorKind::ValidationError,
            ErrorKind::UpstreamSubmissionError,
            ErrorKind::UpstreamTerminalFailure,
            ErrorKind::CompositionError,
            ErrorKind::InternalError,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_timeout_is_retryable_but_provider_failure_is_not() {
        assert!(ErrorKind::LocalTimeout.is_retryable());
        assert!(!ErrorKind::UpstreamTerminalFailure.is_retryable());
        assert!(!ErrorKind::ValidationError.is_retryable());
    }
}
