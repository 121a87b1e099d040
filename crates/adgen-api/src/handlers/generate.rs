//! Synchronous generation.

use adgen_models::JobId;
use adgen_pipeline::{validate, JobContext};
use axum::body::Body;
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::form::read_draft;
use crate::state::AppState;

/// Name offered to the browser for every generated video.
pub const VIDEO_FILENAME: &str = "marketing_video.mp4";

/// Generate a video and answer with the mp4 itself.
///
/// The request holds the connection for the whole pipeline; `POST /api/jobs`
/// is the non-blocking alternative.
pub async fn generate_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let draft = read_draft(multipart).await?;
    let request = validate(draft, &state.orchestrator.limits())?;

    let job_id = JobId::new();
    info!(job_id = %job_id, mode = request.mode.as_str(), "Synchronous generation requested");

    let video = state
        .orchestrator
        .generate(request, &JobContext::new(job_id))
        .await?;
    let bytes = video.into_bytes().await?;

    video_response(bytes)
}

/// Build the attachment response for a finished video.
pub fn video_response(bytes: Vec<u8>) -> ApiResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{VIDEO_FILENAME}\""),
        )
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}
