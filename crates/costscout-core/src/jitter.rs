//! Randomised pre-request delay.
//!
//! Independent from the hard rate limit: it spreads requests out so the
//! timing does not look like a fixed-interval bot.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::SourceConfig;
use crate::error::AppError;
use crate::rate_limiter::sleep_or_cancel;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestJitter {
    pub min: Duration,
    pub max: Duration,
}

impl RequestJitter {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.min_delay, config.max_delay)
    }

    /// Uniform in `[min, max]`, or `min` when `max` is not above it.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    /// Sleep for one sampled delay, honouring cancellation.
    pub async fn delay(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let d = self.sample();
        if d.is_zero() {
            return Ok(());
        }
        tracing::debug!(delay_ms = %d.as_millis(), "Jittering request");
        sleep_or_cancel(d, cancel).await
    }
}
