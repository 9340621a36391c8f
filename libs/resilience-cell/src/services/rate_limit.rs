use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::models::{RateDecision, RateLimiterConfig};

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Token bucket per logical key (one bucket per outbound-channel target).
///
/// Check and decrement happen under one lock acquisition, so two turns for
/// the same key cannot both spend the last token.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub async fn try_acquire(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.config.capacity,
            last_refill: now,
        });

        // Credit whole refill intervals elapsed since the last refill.
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let interval = self.config.refill_interval;
        if !interval.is_zero() {
            let intervals = (elapsed.as_nanos() / interval.as_nanos()) as u32;
            if intervals > 0 {
                bucket.tokens = bucket
                    .tokens
                    .saturating_add(intervals.saturating_mul(self.config.refill_amount))
                    .min(self.config.capacity);
                bucket.last_refill += interval * intervals;
            }
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            RateDecision::Allowed {
                remaining: bucket.tokens,
            }
        } else {
            let retry_after = interval.saturating_sub(now.saturating_duration_since(bucket.last_refill));
            debug!("rate limit exhausted for {}, retry in {:?}", key, retry_after);
            RateDecision::Deferred { retry_after }
        }
    }
}
