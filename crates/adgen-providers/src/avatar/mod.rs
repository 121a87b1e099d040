//! Talking-head avatar video providers.
//!
//! Every provider follows the same shape: an optional identity upload, one
//! submission returning a job id, then status reads until the job settles.
//! [`AvatarJobClient`] drives that lifecycle on top of any [`AvatarProvider`].

mod did;
mod heygen;

pub use did::{DidClient, DidConfig};
pub use heygen::{HeyGenClient, HeyGenConfig};

use std::sync::Arc;

use adgen_models::{CanvasSize, GenerationJob, PollPolicy, Rgb};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use crate::error::{ProviderError, ProviderResult};
use crate::poll::{poll_until_terminal, RemoteStatus};

/// Who appears in the video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarIdentity {
    /// The provider's configured default presenter
    Default,
    /// Photo uploaded by the client
    Image { bytes: Vec<u8>, extension: String },
}

/// How a provider refers to a prepared identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// Stock avatar or presenter
    Presenter,
    /// Uploaded photo
    Photo,
}

/// Identity after any upload the provider needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedIdentity {
    pub kind: IdentityKind,
    /// Provider-specific reference (URL or id)
    pub reference: String,
}

/// What the avatar says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarScript {
    /// Provider-side speech from text
    Text(String),
    /// Pre-synthesized audio hosted at a URL
    AudioUrl(String),
}

/// A single avatar video submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarRequest {
    pub identity: PreparedIdentity,
    pub script: AvatarScript,
    pub canvas: CanvasSize,
    pub background: Rgb,
}

/// A remote avatar video service.
#[async_trait]
pub trait AvatarProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the provider can voice a plain-text script itself.
    fn speaks_text(&self) -> bool {
        true
    }

    /// Resolve the identity, uploading the photo if there is one.
    async fn prepare_identity(&self, identity: AvatarIdentity) -> ProviderResult<PreparedIdentity>;

    /// Submit a job. Returns the provider job id.
    async fn submit(&self, request: &AvatarRequest) -> ProviderResult<String>;

    /// Read the job's current status once.
    async fn fetch_status(&self, job_id: &str) -> ProviderResult<RemoteStatus>;
}

/// Submits avatar jobs and waits for them within a poll ceiling.
#[derive(Clone)]
pub struct AvatarJobClient {
    provider: Arc<dyn AvatarProvider>,
    policy: PollPolicy,
}

impl AvatarJobClient {
    pub fn new(provider: Arc<dyn AvatarProvider>, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub async fn prepare_identity(&self, identity: AvatarIdentity) -> ProviderResult<PreparedIdentity> {
        self.provider.prepare_identity(identity).await
    }

    /// Submit once. Submission failures are never retried.
    pub async fn submit(&self, request: &AvatarRequest) -> ProviderResult<GenerationJob> {
        let name = self.provider.name();
        let job_id = match self.provider.submit(request).await {
            Ok(id) => id,
            Err(e) => {
                metrics::counter!("adgen_avatar_submissions_total", "provider" => name, "outcome" => "rejected")
                    .increment(1);
                return Err(e);
            }
        };

        if job_id.trim().is_empty() {
            return Err(ProviderError::submission(name, "empty job id"));
        }

        metrics::counter!("adgen_avatar_submissions_total", "provider" => name, "outcome" => "accepted")
            .increment(1);
        info!(provider = name, job_id = %job_id, "Submitted avatar job");
        Ok(GenerationJob::submitted(name, job_id))
    }

    /// Poll a submitted job until it settles. Returns the result video URL.
    pub async fn await_completion<U>(
        &self,
        job: &mut GenerationJob,
        cancel: Option<watch::Receiver<bool>>,
        on_update: U,
    ) -> ProviderResult<String>
    where
        U: FnMut(&GenerationJob),
    {
        let provider = self.provider.clone();
        let job_id = job.job_id.clone();
        poll_until_terminal(job, self.policy, cancel, on_update, || {
            let provider = provider.clone();
            let job_id = job_id.clone();
            async move { provider.fetch_status(&job_id).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adgen_models::JobStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Scripted {
        reads: AtomicU32,
        complete_at: u32,
    }

    #[async_trait]
    impl AvatarProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn prepare_identity(&self, _identity: AvatarIdentity) -> ProviderResult<PreparedIdentity> {
            Ok(PreparedIdentity {
                kind: IdentityKind::Presenter,
                reference: "presenter".into(),
            })
        }

        async fn submit(&self, _request: &AvatarRequest) -> ProviderResult<String> {
            Ok("job-42".into())
        }

        async fn fetch_status(&self, job_id: &str) -> ProviderResult<RemoteStatus> {
            assert_eq!(job_id, "job-42");
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.complete_at {
                Ok(RemoteStatus::completed("https://cdn.example/avatar.mp4"))
            } else {
                Ok(RemoteStatus::pending(JobStatus::Processing))
            }
        }
    }

    fn request() -> AvatarRequest {
        AvatarRequest {
            identity: PreparedIdentity {
                kind: IdentityKind::Presenter,
                reference: "presenter".into(),
            },
            script: AvatarScript::Text("Hello world".into()),
            canvas: CanvasSize::SQUARE,
            background: Rgb::new(211, 211, 211),
        }
    }

    #[tokio::test]
    async fn test_submit_then_complete() {
        let provider = Arc::new(Scripted {
            reads: AtomicU32::new(0),
            complete_at: 3,
        });
        let client = AvatarJobClient::new(provider.clone(), PollPolicy::new(Duration::from_millis(1), 5));

        let mut job = client.submit(&request()).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let url = client.await_completion(&mut job, None, |_| {}).await.unwrap();
        assert_eq!(url, "https://cdn.example/avatar.mp4");
        assert_eq!(job.poll_attempts, 3);
        assert_eq!(provider.reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ceiling_below_completion_times_out() {
        let provider = Arc::new(Scripted {
            reads: AtomicU32::new(0),
            complete_at: 10,
        });
        let client = AvatarJobClient::new(provider.clone(), PollPolicy::new(Duration::from_millis(1), 4));

        let mut job = client.submit(&request()).await.unwrap();
        let err = client.await_completion(&mut job, None, |_| {}).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { attempts: 4, .. }));
        assert_eq!(job.status, JobStatus::TimedOut);
    }
}
