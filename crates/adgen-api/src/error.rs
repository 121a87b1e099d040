//! API error types.
//!
//! Every failure leaves the server as `{"error": {"kind", "message"}}`.

use adgen_models::{ErrorEnvelope, ErrorKind};
use adgen_pipeline::PipelineError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BadRequest(_) => ErrorKind::ValidationError,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::RateLimited => ErrorKind::RateLimited,
            ApiError::Internal(_) => ErrorKind::InternalError,
            ApiError::Pipeline(e) => e.kind(),
        }
    }

    fn is_input_error(&self) -> bool {
        matches!(self, ApiError::Pipeline(e) if e.is_input_error())
    }

    pub fn status_code(&self) -> StatusCode {
        status_for(self.kind(), self.is_input_error())
    }
}

/// HTTP status for an error kind. `input_error` marks composition failures
/// caused by a corrupt client file.
pub fn status_for(kind: ErrorKind, input_error: bool) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::UpstreamSubmissionError
        | ErrorKind::UpstreamTransientError
        | ErrorKind::UpstreamTerminalFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::LocalTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::CompositionError if input_error => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::CompositionError | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Cancelled | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Gone => StatusCode::GONE,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(kind = %kind, error = %self, "Request failed");
        }

        // Don't expose internal error details in production
        let message = if kind == ErrorKind::InternalError
            && std::env::var("ENVIRONMENT")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false)
        {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorEnvelope::new(kind, message));
        if kind == ErrorKind::RateLimited {
            (status, [(header::RETRY_AFTER, "1")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
