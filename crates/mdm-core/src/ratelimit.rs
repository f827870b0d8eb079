//! Token-bucket bandwidth limiting.
//!
//! A worker asks for allowance before writing each received chunk. Allowance
//! refills continuously at the configured rate; when the bucket is short the
//! worker sleeps exactly as long as the deficit needs, on the job's stop token
//! so pause/cancel is never delayed by throttling.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::control::{StopReason, StopToken};

#[derive(Debug)]
struct Bucket {
    /// Bytes per second; 0 = unlimited.
    rate: u64,
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn capacity(&self) -> f64 {
        (self.rate as f64 / 10.0).max(1.0)
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.rate as f64).min(self.capacity());
    }
}

/// Shared token bucket. Clones refer to the same bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    inner: Arc<Mutex<Bucket>>,
}

impl TokenBucket {
    /// `None` or `Some(0)` = unlimited.
    pub fn new(rate: Option<u64>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Bucket {
                rate: rate.unwrap_or(0),
                tokens: 0.0,
                last: Instant::now(),
            })),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Current rate, `None` when unlimited.
    pub fn rate(&self) -> Option<u64> {
        match self.lock().rate {
            0 => None,
            r => Some(r),
        }
    }

    /// Change the rate; takes effect for the next acquire of every worker.
    pub fn set_rate(&self, rate: Option<u64>) {
        let mut b = self.lock();
        let now = Instant::now();
        b.refill(now);
        b.rate = rate.unwrap_or(0);
        b.tokens = b.tokens.min(b.capacity());
    }

    /// Take one piece of at most `capacity` tokens, or return how long to wait.
    fn try_take(&self, want: u64) -> Result<u64, Duration> {
        let mut b = self.lock();
        if b.rate == 0 {
            return Ok(want);
        }
        b.refill(Instant::now());
        let piece = (want as f64).min(b.capacity());
        if b.tokens >= piece {
            b.tokens -= piece;
            return Ok(piece as u64);
        }
        let deficit = piece - b.tokens;
        Err(Duration::from_secs_f64(deficit / b.rate as f64))
    }

    /// Block until `n` bytes of allowance are granted, or the token stops.
    pub fn acquire(&self, n: u64, stop: &StopToken) -> Result<(), StopReason> {
        let mut left = n;
        while left > 0 {
            match self.try_take(left) {
                Ok(got) => left -= got.max(1).min(left),
                Err(wait) => {
                    if let Some(reason) = stop.wait_timeout(wait) {
                        return Err(reason);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Per-job bucket chained with the global bucket.
#[derive(Debug, Clone)]
pub struct Throttle {
    pub job: TokenBucket,
    pub global: TokenBucket,
}

impl Throttle {
    pub fn new(job: TokenBucket, global: TokenBucket) -> Self {
        Self { job, global }
    }

    pub fn unlimited() -> Self {
        Self::new(TokenBucket::unlimited(), TokenBucket::unlimited())
    }

    pub fn acquire(&self, n: u64, stop: &StopToken) -> Result<(), StopReason> {
        self.job.acquire(n, stop)?;
        self.global.acquire(n, stop)
    }
}
