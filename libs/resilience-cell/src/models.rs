use std::time::Duration;

use thiserror::Error;

/// Decides whether a failed operation is worth another attempt.
///
/// Transport-level failures (timeouts, connection resets, 5xx, rate-limit
/// responses) are retryable; business outcomes such as a slot already being
/// taken must never be.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Backoff before the next attempt: `base * multiplier^(attempt - 1)`,
    /// capped at `max_delay`. Jitter is added separately by the executor.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error,
{
    #[error("operation failed after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    #[error("non-retryable failure on attempt {attempt}: {source}")]
    Aborted { attempt: u32, source: E },
}

impl<E> RetryError<E>
where
    E: std::error::Error,
{
    pub fn into_source(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } => source,
            RetryError::Aborted { source, .. } => source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub capacity: u32,
    pub refill_amount: u32,
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            refill_amount: 20,
            refill_interval: Duration::from_secs(60),
        }
    }
}

/// Outcome of a token-bucket check. Exhausted buckets ask the caller to
/// defer rather than fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Deferred { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}
