//! Exponential-backoff submission for Nomad dispatches.
//!
//! A submission failure is transient by definition (cluster briefly
//! unreachable, capacity evaluation delayed), so the dispatcher calls
//! [`submit_with_backoff`] to retry with increasing delays until the job is
//! accepted, the attempt budget runs out, or the [`CancellationToken`] is
//! triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{DispatchResponse, JobSpec};
use crate::client::JobRunner;

/// Tunable parameters for the exponential-backoff strategy.
pub struct RetryConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Attempts before giving the job back to the poll loop.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Submit a job with exponential backoff.
///
/// Returns `Some(response)` once the runner accepts the job, or `None` when
/// the attempt budget is exhausted or `cancel` is triggered. The caller
/// discards its dispatch row in either case, so the next dispatch cycle
/// picks the task up again.
pub async fn submit_with_backoff<R: JobRunner + ?Sized>(
    runner: &R,
    spec: &JobSpec,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> Option<DispatchResponse> {
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts {
        // Biased so an already-triggered token never starts a submission.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(job_name = %spec.name, "Submission cancelled");
                return None;
            }
            result = runner.submit(spec) => {
                match result {
                    Ok(response) => return Some(response),
                    Err(e) => {
                        tracing::warn!(
                            job_name = %spec.name,
                            error = %e,
                            "Submission attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        if attempt == config.max_attempts {
            break;
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }

    tracing::warn!(
        job_name = %spec.name,
        attempts = config.max_attempts,
        "Submission retries exhausted, leaving dispatch for next cycle",
    );
    None
}
