//! Bounded polling of remote jobs.
//!
//! One loop serves every provider that answers a submission with a job id:
//! read the status at a fixed interval, stop on the first terminal status,
//! give up after the policy's attempt ceiling. A failed read counts as an
//! attempt but never ends the loop on its own.

use std::future::Future;

use adgen_models::{GenerationJob, JobStatus, PollPolicy};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};

/// One status read, as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub status: JobStatus,
    pub result_url: Option<String>,
    pub error_detail: Option<String>,
}

impl RemoteStatus {
    pub fn pending(status: JobStatus) -> Self {
        Self {
            status,
            result_url: None,
            error_detail: None,
        }
    }

    pub fn completed(url: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            result_url: Some(url.into()),
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result_url: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// Poll `job` until it reaches a terminal state.
///
/// Makes at most `policy.max_attempts` reads, sleeping `policy.interval`
/// between reads but not after the last one. `on_update` sees the job after
/// every change. Returns the result URL of a completed job.
pub async fn poll_until_terminal<F, Fut, U>(
    job: &mut GenerationJob,
    policy: PollPolicy,
    mut cancel: Option<watch::Receiver<bool>>,
    mut on_update: U,
    mut fetch: F,
) -> ProviderResult<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<RemoteStatus>>,
    U: FnMut(&GenerationJob),
{
    for attempt in 1..=policy.max_attempts {
        if is_cancelled(&cancel) {
            return Err(abandon(job, &mut on_update));
        }

        job.record_attempt();
        metrics::counter!("adgen_poll_attempts_total", "provider" => job.provider.clone())
            .increment(1);

        match fetch().await {
            Ok(remote) => {
                if let Some(outcome) = apply(job, remote) {
                    on_update(job);
                    return outcome;
                }
                debug!(
                    provider = %job.provider,
                    job_id = %job.job_id,
                    attempt,
                    status = %job.status,
                    "Remote job still pending"
                );
                on_update(job);
            }
            Err(e) => {
                warn!(
                    provider = %job.provider,
                    job_id = %job.job_id,
                    attempt,
                    error = %e,
                    "Status read failed, will retry"
                );
                on_update(job);
            }
        }

        if attempt < policy.max_attempts && sleep_or_cancel(policy, &mut cancel).await {
            return Err(abandon(job, &mut on_update));
        }
    }

    job.time_out();
    on_update(job);
    info!(
        provider = %job.provider,
        job_id = %job.job_id,
        attempts = job.poll_attempts,
        "Gave up waiting for remote job"
    );
    Err(ProviderError::Timeout {
        provider: job.provider.clone(),
        attempts: job.poll_attempts,
    })
}

/// Apply a read to the job. Returns the loop's outcome if the job became terminal.
fn apply(job: &mut GenerationJob, remote: RemoteStatus) -> Option<ProviderResult<String>> {
    match remote.status {
        JobStatus::Completed => match remote.result_url {
            Some(url) => {
                job.observe(JobStatus::Completed, Some(url.clone()), None);
                Some(Ok(url))
            }
            None => {
                job.observe(
                    JobStatus::Failed,
                    None,
                    Some("completed without a result URL".to_string()),
                );
                Some(Err(ProviderError::MissingResult {
                    provider: job.provider.clone(),
                    job_id: job.job_id.clone(),
                }))
            }
        },
        JobStatus::Failed | JobStatus::Cancelled => {
            let detail = remote
                .error_detail
                .unwrap_or_else(|| "no detail provided".to_string());
            job.observe(remote.status, None, Some(detail.clone()));
            Some(Err(ProviderError::TerminalFailure {
                provider: job.provider.clone(),
                status: remote.status,
                detail,
            }))
        }
        // Only this loop imposes a timeout
        JobStatus::TimedOut | JobStatus::Queued => {
            job.observe(JobStatus::Queued, None, None);
            None
        }
        JobStatus::Processing => {
            job.observe(JobStatus::Processing, None, None);
            None
        }
    }
}

fn abandon<U: FnMut(&GenerationJob)>(job: &mut GenerationJob, on_update: &mut U) -> ProviderError {
    job.abandon();
    on_update(job);
    info!(provider = %job.provider, job_id = %job.job_id, "Stopped polling abandoned job");
    ProviderError::Cancelled
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Sleep one interval. Returns `true` if cancelled meanwhile.
async fn sleep_or_cancel(policy: PollPolicy, cancel: &mut Option<watch::Receiver<bool>>) -> bool {
    match cancel {
        Some(rx) => tokio::select! {
            _ = tokio::time::sleep(policy.interval) => false,
            _ = wait_for_cancel(rx) => true,
        },
        None => {
            tokio::time::sleep(policy.interval).await;
            false
        }
    }
}

async fn wait_for_cancel(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone, nobody can cancel any more
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn policy(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), max_attempts)
    }

    #[tokio::test]
    async fn test_never_terminal_makes_exactly_n_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut job = GenerationJob::submitted("test", "job-1");

        let counter = calls.clone();
        let result = poll_until_terminal(&mut job, policy(7), None, |_| {}, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(RemoteStatus::pending(JobStatus::Processing)) }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout { attempts: 7, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 7);
        assert_eq!(job.status, JobStatus::TimedOut);
        assert_eq!(job.poll_attempts, 7);
    }

    #[tokio::test]
    async fn test_failure_at_attempt_k_stops_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut job = GenerationJob::submitted("test", "job-2");

        let counter = calls.clone();
        let result = poll_until_terminal(&mut job, policy(10), None, |_| {}, || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 3 {
                    Ok(RemoteStatus::failed("voice unavailable"))
                } else {
                    Ok(RemoteStatus::pending(JobStatus::Queued))
                }
            }
        })
        .await;

        match result {
            Err(ProviderError::TerminalFailure { detail, status, .. }) => {
                assert_eq!(detail, "voice unavailable");
                assert_eq!(status, JobStatus::Failed);
            }
            other => panic!("expected terminal failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_detail.as_deref(), Some("voice unavailable"));
    }

    #[tokio::test]
    async fn test_failed_reads_are_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut job = GenerationJob::submitted("test", "job-3");

        let counter = calls.clone();
        let url = poll_until_terminal(&mut job, policy(5), None, |_| {}, || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                match n {
                    1 | 2 => Err(ProviderError::transient("test", "503")),
                    _ => Ok(RemoteStatus::completed("https://cdn.example/out.mp4")),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(url, "https://cdn.example/out.mp4");
        assert_eq!(job.poll_attempts, 3);
        assert_eq!(job.result_video_url.as_deref(), Some("https://cdn.example/out.mp4"));
    }

    #[tokio::test]
    async fn test_completed_without_url_is_consistency_error() {
        let mut job = GenerationJob::submitted("test", "job-4");
        let result = poll_until_terminal(&mut job, policy(5), None, |_| {}, || async {
            Ok(RemoteStatus::pending(JobStatus::Completed))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::MissingResult { .. })));
        assert!(job.is_terminal());
        assert_eq!(job.result_video_url, None);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_attempt() {
        let (tx, rx) = watch::channel(false);
        let calls = Arc::new(AtomicU32::new(0));
        let mut job = GenerationJob::submitted("test", "job-5");

        let counter = calls.clone();
        let slow = PollPolicy::new(Duration::from_secs(60), 30);
        let poll = poll_until_terminal(&mut job, slow, Some(rx), |_| {}, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(RemoteStatus::pending(JobStatus::Processing)) }
        });

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };

        let (result, ()) = tokio::join!(poll, cancel);
        assert!(matches!(result, Err(ProviderError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_updates_are_reported() {
        let mut seen = Vec::new();
        let mut job = GenerationJob::submitted("test", "job-6");
        let _ = poll_until_terminal(
            &mut job,
            policy(2),
            None,
            |j| seen.push(j.status),
            || async { Ok(RemoteStatus::pending(JobStatus::Processing)) },
        )
        .await;

        assert_eq!(
            seen,
            vec![JobStatus::Processing, JobStatus::Processing, JobStatus::TimedOut]
        );
    }
}
