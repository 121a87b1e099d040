//! Background generation jobs.
//!
//! Each submitted request runs as its own tokio task; a semaphore bounds how
//! many run at once and the rest wait as `queued`. Callers read snapshots,
//! cancel through the job's watch channel, and claim the finished video
//! exactly once. A sweeper deletes unclaimed videos and forgets old jobs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use adgen_models::{
    ErrorBody, ErrorEnvelope, ErrorKind, GenerationJob, GenerationMode, JobId, JobStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::orchestrator::{EventFn, JobContext, Orchestrator, PipelineEvent, RenderedVideo, Stage};
use crate::validation::GenerationRequest;

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub stage: Stage,
    /// Overall progress in `0.0..=1.0`
    pub progress: f64,
    pub mode: GenerationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_job: Option<GenerationJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// The video is waiting to be downloaded
    pub video_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    fn queued(job_id: JobId, mode: GenerationMode) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Queued,
            stage: Stage::Queued,
            progress: 0.0,
            mode,
            avatar_job: None,
            error: None,
            video_ready: false,
            duration_secs: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub artifacts_expired: usize,
    pub records_evicted: usize,
}

struct JobEntry {
    snapshot: JobSnapshot,
    cancel: watch::Sender<bool>,
    artifact: Option<RenderedVideo>,
    finished_at: Option<Instant>,
}

impl JobEntry {
    fn touch(&mut self) {
        self.snapshot.updated_at = Utc::now();
    }
}

struct RegistryInner {
    orchestrator: Arc<Orchestrator>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    permits: Arc<Semaphore>,
    artifact_ttl: Duration,
    record_ttl: Duration,
    sweep_interval: Duration,
}

/// In-memory registry of background generation jobs.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl JobRegistry {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let config = orchestrator.config();
        let inner = RegistryInner {
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            artifact_ttl: config.artifact_ttl,
            record_ttl: config.record_ttl.max(config.artifact_ttl),
            sweep_interval: config.sweep_interval,
            jobs: Mutex::new(HashMap::new()),
            orchestrator,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.inner.orchestrator
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, JobEntry>> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Jobs not yet finished.
    pub fn active_jobs(&self) -> usize {
        self.jobs()
            .values()
            .filter(|e| !e.snapshot.status.is_terminal())
            .count()
    }

    /// Start a generation in the background. Must be called within a tokio runtime.
    pub fn submit(&self, request: GenerationRequest) -> JobSnapshot {
        let job_id = JobId::new();
        let snapshot = JobSnapshot::queued(job_id.clone(), request.mode);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        self.jobs().insert(
            job_id.clone(),
            JobEntry {
                snapshot: snapshot.clone(),
                cancel: cancel_tx,
                artifact: None,
                finished_at: None,
            },
        );

        metrics::counter!("adgen_jobs_submitted_total", "mode" => request.mode.as_str()).increment(1);
        info!(job_id = %job_id, mode = request.mode.as_str(), "Job submitted");

        let registry = self.clone();
        tokio::spawn(async move { registry.run(job_id, request, cancel_rx).await });

        snapshot
    }

    pub fn status(&self, job_id: &JobId) -> PipelineResult<JobSnapshot> {
        self.jobs()
            .get(job_id)
            .map(|e| e.snapshot.clone())
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }

    /// Ask a running or queued job to stop. Local work stops at the next
    /// checkpoint; a remote provider job may still finish on its side.
    pub fn cancel(&self, job_id: &JobId) -> PipelineResult<JobSnapshot> {
        let mut jobs = self.jobs();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        if entry.snapshot.status.is_terminal() {
            return Err(PipelineError::AlreadyFinished(job_id.to_string()));
        }

        entry.cancel.send_replace(true);
        entry.snapshot.cancel_requested = true;
        entry.touch();
        info!(job_id = %job_id, "Job cancellation requested");
        Ok(entry.snapshot.clone())
    }

    /// Hand out the finished video. Only the first call succeeds.
    pub fn take_artifact(&self, job_id: &JobId) -> PipelineResult<RenderedVideo> {
        let mut jobs = self.jobs();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        match entry.artifact.take() {
            Some(video) => {
                entry.snapshot.video_ready = false;
                entry.touch();
                Ok(video)
            }
            None if entry.snapshot.status == JobStatus::Completed => {
                Err(PipelineError::Gone(job_id.to_string()))
            }
            None => Err(PipelineError::NotReady(job_id.to_string())),
        }
    }

    /// Delete unclaimed videos past their TTL and forget old finished jobs.
    pub async fn sweep(&self) -> SweepStats {
        let now = Instant::now();
        let artifact_ttl = self.inner.artifact_ttl;
        let record_ttl = self.inner.record_ttl;
        let mut stats = SweepStats::default();
        let mut expired = Vec::new();

        self.jobs().retain(|_, entry| {
            let Some(finished_at) = entry.finished_at else {
                return true;
            };
            let age = now.duration_since(finished_at);

            if age >= artifact_ttl {
                if let Some(video) = entry.artifact.take() {
                    entry.snapshot.video_ready = false;
                    stats.artifacts_expired += 1;
                    expired.push(video);
                }
            }
            if age >= record_ttl {
                stats.records_evicted += 1;
                return false;
            }
            true
        });

        for video in expired {
            if let Err(e) = video.scope.release_all().await {
                warn!(error = %e, "Failed to delete expired video");
            }
        }

        if stats != SweepStats::default() {
            debug!(
                artifacts_expired = stats.artifacts_expired,
                records_evicted = stats.records_evicted,
                "Swept job registry"
            );
        }
        stats
    }

    /// Run [`JobRegistry::sweep`] periodically until the runtime shuts down.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.inner.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    async fn run(self, job_id: JobId, request: GenerationRequest, mut cancel: watch::Receiver<bool>) {
        let permit = tokio::select! {
            permit = self.inner.permits.clone().acquire_owned() => Some(permit),
            _ = wait_for_cancel(&mut cancel) => None,
        };

        let result = match permit {
            None => Err(PipelineError::Cancelled),
            Some(Err(_)) => Err(PipelineError::internal("job queue closed")),
            Some(Ok(_permit)) => {
                self.update(&job_id, |entry| {
                    entry.snapshot.status = JobStatus::Processing;
                });
                metrics::gauge!("adgen_jobs_running").increment(1.0);

                let ctx = JobContext::new(job_id.clone())
                    .with_cancel(cancel)
                    .with_events(self.event_sink(&job_id));
                let result = self.inner.orchestrator.generate(request, &ctx).await;

                metrics::gauge!("adgen_jobs_running").decrement(1.0);
                result
            }
        };

        self.finish(&job_id, result).await;
    }

    fn event_sink(&self, job_id: &JobId) -> EventFn {
        let registry = self.clone();
        let job_id = job_id.clone();
        Arc::new(move |event: PipelineEvent| {
            registry.update(&job_id, |entry| apply_event(&mut entry.snapshot, event));
        })
    }

    fn update(&self, job_id: &JobId, f: impl FnOnce(&mut JobEntry)) {
        if let Some(entry) = self.jobs().get_mut(job_id) {
            f(entry);
            entry.touch();
        }
    }

    async fn finish(&self, job_id: &JobId, result: PipelineResult<RenderedVideo>) {
        let outcome = match &result {
            Ok(_) => "completed",
            Err(e) => e.kind().as_str(),
        };
        metrics::counter!("adgen_jobs_finished_total", "outcome" => outcome).increment(1);

        let orphan = {
            let mut jobs = self.jobs();
            match jobs.get_mut(job_id) {
                Some(entry) => {
                    entry.finished_at = Some(Instant::now());
                    entry.touch();
                    let snapshot = &mut entry.snapshot;
                    match result {
                        Ok(video) => {
                            snapshot.status = JobStatus::Completed;
                            snapshot.stage = Stage::Done;
                            snapshot.progress = 1.0;
                            snapshot.video_ready = true;
                            snapshot.duration_secs = Some(video.duration_secs);
                            entry.artifact = Some(video);
                            info!(job_id = %job_id, "Job completed");
                        }
                        Err(e) => {
                            let kind = e.kind();
                            snapshot.status = match kind {
                                ErrorKind::Cancelled => JobStatus::Cancelled,
                                ErrorKind::LocalTimeout => JobStatus::TimedOut,
                                _ => JobStatus::Failed,
                            };
                            snapshot.error = Some(ErrorEnvelope::new(kind, e.to_string()).error);
                            info!(job_id = %job_id, kind = %kind, "Job finished without a video");
                        }
                    }
                    None
                }
                None => result.ok(),
            }
        };

        if let Some(video) = orphan {
            let _ = video.scope.release_all().await;
        }
    }
}

fn apply_event(snapshot: &mut JobSnapshot, event: PipelineEvent) {
    match event {
        PipelineEvent::Stage(stage) => {
            snapshot.stage = stage;
            snapshot.progress = snapshot.progress.max(stage.base_progress());
        }
        PipelineEvent::Avatar(job) => snapshot.avatar_job = Some(job),
        PipelineEvent::Render(fraction) => {
            let base = Stage::Compositing.base_progress();
            let progress = base + (1.0 - base) * fraction.clamp(0.0, 1.0);
            snapshot.progress = snapshot.progress.max(progress.min(0.99));
        }
    }
}

/// Resolves once the flag is set. Never resolves if the sender is gone.
async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::testing::{request, FakeRenderer, FakeSpeech};
    use adgen_storage::MediaAssetStore;

    async fn registry(speech: FakeSpeech, config: PipelineConfig) -> (tempfile::TempDir, JobRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaAssetStore::new(dir.path().join("work")).await.unwrap();
        let orchestrator = Orchestrator::new(
            store,
            Arc::new(speech),
            Arc::new(FakeRenderer::new(1.5)),
            config,
        )
        .unwrap();
        (dir, JobRegistry::new(Arc::new(orchestrator)))
    }

    async fn wait_for(
        registry: &JobRegistry,
        job_id: &JobId,
        done: impl Fn(&JobSnapshot) -> bool,
    ) -> JobSnapshot {
        for _ in 0..400 {
            let snapshot = registry.status(job_id).unwrap();
            if done(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never reached the expected state");
    }

    #[tokio::test]
    async fn test_completed_video_is_delivered_once() {
        let (_dir, registry) = registry(FakeSpeech::inline(), PipelineConfig::default()).await;

        let submitted = registry.submit(request());
        assert_eq!(submitted.status, JobStatus::Queued);

        let done = wait_for(&registry, &submitted.job_id, |s| s.status.is_terminal()).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.stage, Stage::Done);
        assert!(done.video_ready);
        assert_eq!(done.duration_secs, Some(1.5));
        assert_eq!(done.progress, 1.0);

        let video = registry.take_artifact(&submitted.job_id).unwrap();
        assert_eq!(video.into_bytes().await.unwrap(), FakeRenderer::OUTPUT);

        let err = registry.take_artifact(&submitted.job_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Gone);
        assert!(!registry.status(&submitted.job_id).unwrap().video_ready);
        assert_eq!(registry.orchestrator().store().live_scopes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (_dir, registry) = registry(FakeSpeech::hanging(), PipelineConfig::default()).await;
        let job_id = registry.submit(request()).job_id;

        wait_for(&registry, &job_id, |s| s.stage == Stage::Synthesizing).await;
        assert_eq!(registry.active_jobs(), 1);
        assert!(registry.cancel(&job_id).unwrap().cancel_requested);

        let done = wait_for(&registry, &job_id, |s| s.status.is_terminal()).await;
        assert_eq!(done.status, JobStatus::Cancelled);
        assert_eq!(done.error.unwrap().kind, ErrorKind::Cancelled);

        let err = registry.cancel(&job_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(registry.take_artifact(&job_id).unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(registry.orchestrator().store().live_scopes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit_queues_extra_jobs() {
        let config = PipelineConfig {
            max_concurrent_jobs: 1,
            ..Default::default()
        };
        let (_dir, registry) = registry(FakeSpeech::hanging(), config).await;

        let first = registry.submit(request()).job_id;
        wait_for(&registry, &first, |s| s.status == JobStatus::Processing).await;

        let second = registry.submit(request()).job_id;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.status(&second).unwrap().status, JobStatus::Queued);

        registry.cancel(&second).unwrap();
        let done = wait_for(&registry, &second, |s| s.status.is_terminal()).await;
        assert_eq!(done.status, JobStatus::Cancelled);
        assert_eq!(done.stage, Stage::Queued);

        registry.cancel(&first).unwrap();
        wait_for(&registry, &first, |s| s.status.is_terminal()).await;
        assert_eq!(registry.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_sweep_expires_unclaimed_videos() {
        let config = PipelineConfig {
            artifact_ttl: Duration::ZERO,
            record_ttl: Duration::ZERO,
            ..Default::default()
        };
        let (_dir, registry) = registry(FakeSpeech::inline(), config).await;
        let job_id = registry.submit(request()).job_id;
        wait_for(&registry, &job_id, |s| s.status.is_terminal()).await;
        assert_eq!(registry.orchestrator().store().live_scopes().await.unwrap(), 1);

        let stats = registry.sweep().await;
        assert_eq!(
            stats,
            SweepStats {
                artifacts_expired: 1,
                records_evicted: 1
            }
        );
        assert_eq!(registry.orchestrator().store().live_scopes().await.unwrap(), 0);
        assert_eq!(registry.status(&job_id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_render_progress_never_reaches_done_early() {
        let mut snapshot = JobSnapshot::queued(JobId::new(), GenerationMode::Voiceover);
        apply_event(&mut snapshot, PipelineEvent::Stage(Stage::Compositing));
        assert_eq!(snapshot.progress, Stage::Compositing.base_progress());

        apply_event(&mut snapshot, PipelineEvent::Render(1.0));
        assert!(snapshot.progress < 1.0);

        apply_event(&mut snapshot, PipelineEvent::Render(0.1));
        assert!(snapshot.progress >= 0.99);
    }
}
