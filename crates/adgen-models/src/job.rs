//! Generation jobs tracked by remote providers.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a local generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started
    #[default]
    Queued,
    /// Work in progress
    Processing,
    /// Finished with a result
    Completed,
    /// Finished without a result
    Failed,
    /// Stopped by the provider or abandoned by the caller
    Cancelled,
    /// Local poll ceiling exhausted
    TimedOut,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::TimedOut => "timed_out",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::TimedOut
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A job running on a remote provider.
///
/// Status changes only through [`GenerationJob::observe`] (a provider read) or the
/// locally-imposed terminals [`GenerationJob::time_out`] and [`GenerationJob::abandon`].
/// Once terminal, the job never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationJob {
    /// Provider name (e.g. "d-id")
    pub provider: String,
    /// Opaque provider job id
    pub job_id: String,
    pub submitted_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Present iff status is completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_video_url: Option<String>,
    /// Provider error detail, verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Number of status reads made so far
    pub poll_attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    /// Record a freshly submitted job.
    pub fn submitted(provider: impl Into<String>, job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            provider: provider.into(),
            job_id: job_id.into(),
            submitted_at: now,
            status: JobStatus::Queued,
            result_video_url: None,
            error_detail: None,
            poll_attempts: 0,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Count a status read, whether or not it succeeded.
    pub fn record_attempt(&mut self) {
        if !self.is_terminal() {
            self.poll_attempts += 1;
            self.updated_at = Utc::now();
        }
    }

    /// Apply a status reported by the provider.
    ///
    /// Returns `false` if the job was already terminal and the read was ignored.
    pub fn observe(
        &mut self,
        status: JobStatus,
        result_video_url: Option<String>,
        error_detail: Option<String>,
    ) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.status = status;
        self.updated_at = Utc::now();
        match status {
            JobStatus::Completed => self.result_video_url = result_video_url,
            JobStatus::Failed | JobStatus::Cancelled => self.error_detail = error_detail,
            _ => {}
        }
        true
    }

    /// Mark the job as given up after exhausting the poll ceiling.
    pub fn time_out(&mut self) {
        if !self.is_terminal() {
            self.status = JobStatus::TimedOut;
            self.updated_at = Utc::now();
        }
    }

    /// Mark the job as abandoned by the caller. The remote job may keep running.
    pub fn abandon(&mut self) {
        if !self.is_terminal() {
            self.status = JobStatus::Cancelled;
            self.error_detail = Some("abandoned by caller".to_string());
            self.updated_at = Utc::now();
        }
    }
}
