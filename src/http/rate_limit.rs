//! Token-bucket admission control, one instance per external API.
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Error, PartialEq)]
pub enum RateLimitError {
    #[error("rate limiter capacity must be at least 1")]
    ZeroCapacity,
    #[error("rate limiter refill rate must be a positive finite number (got {0})")]
    InvalidRefillRate(f64),
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Lazily refilled token bucket. `acquire` calls are serialized through an async
/// mutex, so waiting callers are admitted in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Starts full: the first `capacity` acquisitions never wait.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::ZeroCapacity);
        }
        if !refill_per_sec.is_finite() || refill_per_sec <= 0.0 {
            return Err(RateLimitError::InvalidRefillRate(refill_per_sec));
        }
        Ok(Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        })
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return;
        }
        let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec);
        trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting for token");
        tokio::time::sleep(wait).await;
        self.refill(&mut bucket);
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);
    }

    /// Take a token only if one is available right now and no other caller is waiting.
    pub fn try_acquire(&self) -> bool {
        let Ok(mut bucket) = self.bucket.try_lock() else {
            return false;
        };
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently in the bucket (after a refill).
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }
}
