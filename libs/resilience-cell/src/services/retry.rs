use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::models::{Retryable, RetryError, RetryPolicy};

/// Runs fallible async operations under an exponential-backoff retry budget.
///
/// Every call against the external calendar goes through here. Whether a
/// failure is worth retrying is decided by the error itself via [`Retryable`],
/// so business failures short-circuit on the first attempt.
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::error::Error,
    {
        let mut attempt: u32 = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!("{} failed with non-retryable error: {}", label, e);
                    return Err(RetryError::Aborted { attempt, source: e });
                }
                Err(e) => {
                    if attempt >= self.policy.max_attempts {
                        warn!("{} exhausted {} attempts: {}", label, attempt, e);
                        return Err(RetryError::Exhausted { attempts: attempt, source: e });
                    }

                    let delay = self.delay_with_jitter(attempt);
                    warn!(
                        "{} failed on attempt {} ({}), retrying in {:?}",
                        label, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Capped exponential backoff plus uniform jitter up to 10% of the
    /// capped value, so concurrent conversations do not hammer the calendar
    /// in lockstep after an outage.
    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let capped = self.policy.backoff_for_attempt(attempt);
        let jitter_ceiling = capped.as_secs_f64() * 0.1;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_ceiling);
        capped + Duration::from_secs_f64(jitter)
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
