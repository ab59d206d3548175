//! Token-bucket limiter for host→client binary throughput.
//!
//! Capacity equals the configured bytes/second, giving a one-second burst.
//! The bucket refills from elapsed monotonic time; a clock that fails to
//! advance contributes zero tokens.

use std::sync::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A per-session byte-rate limiter.
pub struct RateLimiter {
    max_tokens: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `bytes_per_sec` sustained, starting full.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            max_tokens: bytes_per_sec as f64,
            refill_per_sec: bytes_per_sec as f64,
            bucket: Mutex::new(Bucket {
                tokens: bytes_per_sec as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Deduct `n` bytes if the bucket holds enough tokens.
    ///
    /// Returns `false` and leaves the bucket unchanged when it does not.
    pub fn allow(&self, n: usize) -> bool {
        self.allow_at(n, Instant::now())
    }

    /// Like [`allow`](Self::allow) with an explicit clock reading, for tests.
    pub fn allow_at(&self, n: usize, now: Instant) -> bool {
        let mut bucket = self.bucket.lock().expect("rate lock poisoned");

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec)
            .min(self.max_tokens);
        if now > bucket.last_refill {
            bucket.last_refill = now;
        }

        if bucket.tokens >= n as f64 {
            bucket.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    /// The configured rate (and burst capacity) in bytes/second.
    pub fn capacity(&self) -> u64 {
        self.max_tokens as u64
    }
}
