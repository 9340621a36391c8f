pub mod models;
pub mod services;

pub use models::{RateDecision, RateLimiterConfig, Retryable, RetryError, RetryPolicy};
pub use services::rate_limit::RateLimiter;
pub use services::retry::RetryExecutor;
