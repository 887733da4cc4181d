use crate::client::{BqClient, JobReference};
use crate::config::BackoffConfig;
use crate::error::{BqChainError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Doubling wait intervals, capped at `max`. Never ends.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            next: config.initial.min(config.max),
            max: config.max,
        }
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let wait = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        Some(wait)
    }
}

/// Cloneable cancel signal shared between a caller and its poll loops.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender outlives this call, so this only returns once cancelled.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CompletionPoller {
    client: Arc<BqClient>,
    backoff: BackoffConfig,
    cancel: CancellationToken,
}

impl CompletionPoller {
    pub fn new(client: Arc<BqClient>) -> Self {
        let backoff = client.config().backoff;
        Self {
            client,
            backoff,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Polls until the job is DONE. A DONE job carrying an `errorResult`
    /// fails with [`BqChainError::JobFailed`].
    pub async fn await_completion(&self, job: &JobReference) -> Result<()> {
        let mut backoff = Backoff::new(self.backoff);

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(job));
            }

            let status = self.client.get_job_status(job).await?;
            info!(job_id = %job.job_id, state = %status.state, "Polled job status");

            if status.state.is_terminal() {
                return match status.error_result {
                    Some(error) => Err(BqChainError::JobFailed {
                        job_id: job.job_id.clone(),
                        error,
                    }),
                    None => Ok(()),
                };
            }

            let wait = backoff.next().unwrap_or(self.backoff.max);
            info!(
                job_id = %job.job_id,
                wait_ms = wait.as_millis() as u64,
                "Job not done, polling again after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.cancelled() => return Err(self.cancelled(job)),
            }
        }
    }

    fn cancelled(&self, job: &JobReference) -> BqChainError {
        BqChainError::Cancelled {
            job_id: job.job_id.clone(),
        }
    }
}
