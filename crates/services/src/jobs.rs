//! Deferred work and retry helpers.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::collaborators::MeetingProvider;
use crate::error::{JobError, ProviderError};

/// Delay before remote recordings are removed after ingestion.
pub const DEFAULT_RECORDING_CLEANUP: Duration = Duration::from_secs(48 * 60 * 60);

/// Work to run some time after the triggering request has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredJob {
    DeleteRemoteRecording { meeting_number: u64 },
}

impl DeferredJob {
    /// # Errors
    ///
    /// Returns `ProviderError` if the provider call fails.
    pub async fn run(self, provider: &dyn MeetingProvider) -> Result<(), ProviderError> {
        match self {
            DeferredJob::DeleteRemoteRecording { meeting_number } => {
                provider.delete_recordings(meeting_number).await
            }
        }
    }
}

pub trait JobScheduler: Send + Sync {
    /// Queues `job` to run after `delay`.
    ///
    /// # Errors
    ///
    /// Returns `JobError` if the job cannot be queued.
    fn schedule(&self, job: DeferredJob, delay: Duration) -> Result<(), JobError>;
}

/// Runs deferred jobs as detached tokio tasks.
///
/// Pending jobs live only in memory and are lost on restart.
#[derive(Clone)]
pub struct TokioScheduler {
    provider: Arc<dyn MeetingProvider>,
}

impl TokioScheduler {
    #[must_use]
    pub fn new(provider: Arc<dyn MeetingProvider>) -> Self {
        Self { provider }
    }
}

impl JobScheduler for TokioScheduler {
    fn schedule(&self, job: DeferredJob, delay: Duration) -> Result<(), JobError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| JobError::NoRuntime)?;
        let provider = Arc::clone(&self.provider);
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            match job.run(provider.as_ref()).await {
                Ok(()) => tracing::info!(?job, "deferred job finished"),
                Err(err) => tracing::error!(?job, error = %err, "deferred job failed"),
            }
        });
        tracing::debug!(?job, delay_secs = delay.as_secs(), "scheduled deferred job");
        Ok(())
    }
}

/// Bounded retry with exponential backoff and jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`, without jitter.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }

    /// Runs `op` until it succeeds or `max_attempts` is reached.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= max_attempts => {
                    tracing::error!(label, attempt, error = %err, "giving up after retries");
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.backoff(attempt) + self.jitter();
                    tracing::warn!(
                        label,
                        attempt,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.base_delay.as_millis() / 2).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}
