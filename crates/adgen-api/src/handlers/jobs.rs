//! Background job handlers.

use adgen_models::{JobId, JobStatus};
use adgen_pipeline::{validate, JobSnapshot};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tracing::info;

use super::generate::video_response;
use crate::error::ApiResult;
use crate::form::read_draft;
use crate::state::AppState;

/// Response for an accepted job.
#[derive(Serialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub status_url: String,
}

/// Job status with a download link once the video is ready.
#[derive(Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub job: JobSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl From<JobSnapshot> for JobStatusResponse {
    fn from(job: JobSnapshot) -> Self {
        let video_url = job.video_ready.then(|| video_path(&job.job_id));
        Self { job, video_url }
    }
}

fn status_path(job_id: &JobId) -> String {
    format!("/api/jobs/{job_id}")
}

fn video_path(job_id: &JobId) -> String {
    format!("/api/jobs/{job_id}/video")
}

/// Validate the form and start a background job.
///
/// Validation failures are reported here, before any job exists.
pub async fn submit_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let draft = read_draft(multipart).await?;
    let request = validate(draft, &state.orchestrator.limits())?;
    state.orchestrator.ensure_supported(&request)?;

    let snapshot = state.jobs.submit(request);
    info!(job_id = %snapshot.job_id, mode = snapshot.mode.as_str(), "Job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            status_url: status_path(&snapshot.job_id),
            job_id: snapshot.job_id,
            status: snapshot.status,
        }),
    ))
}

/// Current job status.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let snapshot = state.jobs.status(&JobId::from_string(job_id))?;
    Ok(Json(snapshot.into()))
}

/// Hand over the finished video. Works once per job.
pub async fn download_job_video(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job_id = JobId::from_string(job_id);
    let video = state.jobs.take_artifact(&job_id)?;
    let bytes = video.into_bytes().await?;
    info!(job_id = %job_id, bytes = bytes.len(), "Job video delivered");
    video_response(bytes)
}

/// Request cancellation of a queued or running job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let snapshot = state.jobs.cancel(&JobId::from_string(job_id))?;
    Ok(Json(snapshot.into()))
}
