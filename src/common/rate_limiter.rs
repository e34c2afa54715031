//! Token bucket rate limiter
//!
//! Broker quote endpoints publish per-second limits (Kite: 1 req/s for
//! `/quote`, Dhan: 1 req/s for market feed). Each source owns one limiter;
//! clones share the same bucket.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests allowed per refill interval
    pub max_requests: u32,
    pub refill_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            refill_interval: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_rate(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests.max(1);
        self
    }

    pub fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval = interval;
        self
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Rate limiter shared by all requests to one upstream API
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<Bucket>>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: config.max_requests,
                last_refill: Instant::now(),
            })),
            config,
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        if bucket.last_refill.elapsed() >= self.config.refill_interval {
            bucket.tokens = self.config.max_requests;
            bucket.last_refill = Instant::now();
        }
    }

    /// Take one token, waiting for the next refill when the bucket is empty
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    return;
                }
                self.config
                    .refill_interval
                    .saturating_sub(bucket.last_refill.elapsed())
            };
            sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Take one token without waiting
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    pub async fn available(&self) -> u32 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }
}
