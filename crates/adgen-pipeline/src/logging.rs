//! Structured events for one generation job.
//!
//! Every event is emitted inside the job's `generation` span, so `job_id` and
//! `mode` come along without being repeated at each call site. Stage events
//! carry their own typed fields (provider, remote job id, poll count, error
//! kind) rather than pre-formatted messages.

use std::fmt::Display;

use adgen_models::{GenerationJob, GenerationMode, JobId};
use tracing::{error, info, warn, Span};

use crate::error::PipelineError;

/// Emits the lifecycle events of a single generation.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    mode: GenerationMode,
    span: Span,
}

impl JobLogger {
    pub fn new(job_id: &JobId, mode: GenerationMode) -> Self {
        let job_id = job_id.to_string();
        let span = tracing::info_span!("generation", job_id = %job_id, mode = %mode.as_str());
        Self { job_id, mode, span }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    /// Span the whole generation runs in.
    pub fn span(&self) -> Span {
        self.span.clone()
    }

    pub fn started(&self, canvas: &str, script_chars: usize) {
        self.span.in_scope(|| info!(canvas = %canvas, script_chars, "Generation started"));
    }

    pub fn speech_ready(&self, provider: &str) {
        self.span.in_scope(|| info!(provider = %provider, "Voice-over synthesized"));
    }

    pub fn avatar_submitted(&self, job: &GenerationJob) {
        self.span.in_scope(|| {
            info!(
                provider = %job.provider,
                remote_job_id = %job.job_id,
                "Avatar job submitted"
            )
        });
    }

    pub fn avatar_settled(&self, job: &GenerationJob) {
        self.span.in_scope(|| {
            info!(
                provider = %job.provider,
                remote_job_id = %job.job_id,
                status = %job.status.as_str(),
                poll_attempts = job.poll_attempts,
                "Avatar job settled"
            )
        });
    }

    pub fn finished(&self, duration_secs: f64, elapsed_secs: f64) {
        self.span
            .in_scope(|| info!(duration_secs, elapsed_secs, "Generation completed"));
    }

    pub fn failed(&self, err: &PipelineError) {
        self.span.in_scope(|| {
            error!(
                kind = %err.kind().as_str(),
                error = %err,
                "Generation failed"
            )
        });
    }

    /// A scope could not be released; the job outcome is unaffected.
    pub fn cleanup_failed(&self, scope: &str, err: &dyn Display) {
        self.span
            .in_scope(|| warn!(scope = %scope, error = %err, "Failed to release job files"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adgen_models::JobStatus;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture<F: FnOnce()>(f: F) -> String {
        let out = Capture::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        out.text()
    }

    #[test]
    fn test_job_logger_fields() {
        let logger = JobLogger::new(&JobId::from_string("job-123"), GenerationMode::Avatar);

        assert_eq!(logger.job_id(), "job-123");
        assert_eq!(logger.mode(), GenerationMode::Avatar);
    }

    #[test]
    fn test_avatar_events_carry_provider_fields() {
        let out = capture(|| {
            let logger = JobLogger::new(&JobId::from_string("job-123"), GenerationMode::Avatar);
            let mut job = GenerationJob::submitted("d-id", "tlk_1");
            logger.avatar_submitted(&job);

            job.record_attempt();
            job.record_attempt();
            job.observe(JobStatus::Completed, Some("https://d-id/v.mp4".into()), None);
            logger.avatar_settled(&job);
        });

        assert!(out.contains("generation{job_id=job-123 mode=avatar}"), "{out}");
        assert!(out.contains("Avatar job submitted provider=d-id remote_job_id=tlk_1"), "{out}");
        assert!(out.contains("status=completed poll_attempts=2"), "{out}");
    }

    #[test]
    fn test_failure_event_carries_error_kind() {
        let out = capture(|| {
            let logger = JobLogger::new(&JobId::from_string("job-9"), GenerationMode::Voiceover);
            logger.failed(&PipelineError::validation("script is empty"));
        });

        assert!(out.contains("mode=voiceover"), "{out}");
        assert!(out.contains("kind=validation_error"), "{out}");
    }
}
