// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-`(key hash, action)` token bucket.
//!
//! Buckets refill continuously; a rejected call reports how long until one
//! token is available.  The test-mode switch turns the limiter into a
//! pass-through.

use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::Mutex;

/// Seconds the caller should wait before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAfter(pub u64);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refreshed: Instant,
}

/// Keyed token-bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<(String, String), Bucket>>,
    capacity: f64,
    refill_per_sec: f64,
    enabled: bool,
}

impl RateLimiter {
    /// A limiter allowing `capacity` immediate calls per key/action,
    /// refilling at `refill_per_sec` tokens per second.
    pub fn new(capacity: u32, refill_per_sec: f64, enabled: bool) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity: f64::from(capacity),
            refill_per_sec,
            enabled,
        }
    }

    /// The subscription-surface limiter: 10 creations per 60 seconds.
    pub fn subscriptions(test_mode: bool) -> Self {
        Self::new(10, 10.0 / 60.0, !test_mode)
    }

    /// Take one token for `(key_hash, action)`.
    pub async fn check(&self, key_hash: &str, action: &str) -> Result<(), RetryAfter> {
        self.check_at(key_hash, action, Instant::now()).await
    }

    async fn check_at(
        &self,
        key_hash: &str,
        action: &str,
        now: Instant,
    ) -> Result<(), RetryAfter> {
        if !self.enabled {
            return Ok(());
        }
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry((key_hash.to_string(), action.to_string()))
            .or_insert(Bucket {
                tokens: self.capacity,
                refreshed: now,
            });

        let elapsed = now.saturating_duration_since(bucket.refreshed).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.refreshed = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = (deficit / self.refill_per_sec).ceil().max(1.0) as u64;
            Err(RetryAfter(wait))
        }
    }

    /// Drop all buckets (tests).
    pub async fn clear(&self) {
        self.buckets.lock().await.clear();
    }
}
