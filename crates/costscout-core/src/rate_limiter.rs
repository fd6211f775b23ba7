//! Per-source token bucket.
//!
//! Each source owns one [`RateLimiter`] with capacity 1 that refills at the
//! configured requests/sec. [`RateLimiter::wait`] is called before every
//! outbound fetch; [`RateLimiter::allow`] is a non-consuming probe used by the
//! orchestrator to refuse a run up front instead of blocking.
//!
//! # Example
//!
//! ```rust,no_run
//! use costscout_core::rate_limiter::RateLimiter;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), costscout_core::AppError> {
//! let limiter = RateLimiter::new(2.0); // 2 requests/sec
//! let cancel = CancellationToken::new();
//! if limiter.allow() {
//!     limiter.wait(&cancel).await?;
//!     // ... issue the request
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

const CAPACITY: f64 = 1.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(CAPACITY);
        self.last_refill = now;
    }
}

/// Thread-safe token bucket of capacity 1.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    rate: f64,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Create a full bucket refilling at `rate` tokens per second.
    ///
    /// A non-positive or non-finite rate is treated as one request per second.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            1.0
        };
        Self {
            rate,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: CAPACITY,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    fn lock_bucket(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter mutex");
            poisoned.into_inner()
        })
    }

    /// Returns true if a token is available right now. Does not consume it.
    pub fn allow(&self) -> bool {
        let mut bucket = self.lock_bucket();
        bucket.refill(self.rate);
        bucket.tokens >= CAPACITY
    }

    /// Block until a token is available and take it.
    ///
    /// Fails with [`AppError::Cancelled`] as soon as `cancel` fires, including
    /// when it was already cancelled on entry.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let needed = {
                let mut bucket = self.lock_bucket();
                bucket.refill(self.rate);
                if bucket.tokens >= CAPACITY {
                    bucket.tokens -= CAPACITY;
                    return Ok(());
                }
                // Very small rates overflow Duration; saturate instead.
                Duration::try_from_secs_f64((CAPACITY - bucket.tokens) / self.rate)
                    .unwrap_or(Duration::MAX)
            };

            tracing::debug!(wait_ms = %needed.as_millis(), "Rate limiting request");
            sleep_or_cancel(needed, cancel).await?;
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first.
pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), AppError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
