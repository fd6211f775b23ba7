use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY, SourceConfig};
use crate::error::AppError;
use crate::rate_limiter::sleep_or_cancel;

/// Exponents above this are clamped so the delay stays finite.
const MAX_EXPONENT: u32 = 16;

/// Exponential backoff with jitter for a 0-based attempt index.
///
/// `base * 2^attempt + uniform(0, base/2)`
pub fn backoff(attempt: u32, base: Duration) -> Duration {
    let exponential = base.saturating_mul(1u32 << attempt.min(MAX_EXPONENT));
    let half_ms = (base.as_millis() / 2) as u64;
    let jitter = if half_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::rng().random_range(0..=half_ms))
    };
    exponential.saturating_add(jitter)
}

/// Bounded retry schedule for the source fetch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(
            config.effective_max_retries(),
            config.effective_retry_base_delay(),
        )
    }

    /// Delay before retrying after the failed attempt `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff(attempt, self.base_delay)
    }

    /// Whether another attempt may follow the 0-based `attempt`.
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Sleep out the backoff for `attempt`, honouring cancellation.
    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let delay = self.delay_for_attempt(attempt);
        tracing::debug!(attempt, delay_ms = %delay.as_millis(), "Backing off before retry");
        sleep_or_cancel(delay, cancel).await
    }
}
