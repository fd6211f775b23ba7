//! Generic page source: one implementation for every site.
//!
//! Site differences are data (URLs, [`SourceConfig`], the extractor's
//! strategies); the request discipline is shared:
//!
//! ```text
//! Idle -> RateWaiting -> Jittering -> Fetching -+-> Blocked    -+
//!                                               +-> BadStatus  -+
//!                                               +-> FetchError -+--> retry decision
//!                                               +-> Parsing -> Extracting -+-> Empty -+
//!                                                                          +-> Succeeded
//! retry decision: backoff and go again, or Failed when attempts are
//! exhausted or the run was cancelled.
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::antibot::AntiBotDetector;
use crate::config::SourceConfig;
use crate::error::{AppError, ErrorKind};
use crate::jitter::RequestJitter;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::models::Record;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::traits::{Fetcher, PageExtractor, Source};

/// Where a single URL's fetch loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    RateWaiting,
    Jittering,
    Fetching,
    Blocked,
    BadStatus,
    FetchError,
    Parsing,
    Extracting,
    Succeeded,
    Empty,
    Failed,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::Idle => "idle",
            SourceState::RateWaiting => "rate_waiting",
            SourceState::Jittering => "jittering",
            SourceState::Fetching => "fetching",
            SourceState::Blocked => "blocked",
            SourceState::BadStatus => "bad_status",
            SourceState::FetchError => "fetch_error",
            SourceState::Parsing => "parsing",
            SourceState::Extracting => "extracting",
            SourceState::Succeeded => "succeeded",
            SourceState::Empty => "empty",
            SourceState::Failed => "failed",
        }
    }

    /// State a failed attempt lands in before the retry decision.
    fn after_failure(err: &AppError) -> Self {
        match err.kind() {
            ErrorKind::Blocked => SourceState::Blocked,
            ErrorKind::BadStatus => SourceState::BadStatus,
            ErrorKind::Empty => SourceState::Empty,
            ErrorKind::Parse => SourceState::Parsing,
            _ => SourceState::FetchError,
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A [`Source`] that fetches a fixed list of URLs through the shared
/// rate-limit / jitter / retry / anti-bot pipeline and hands each page to an
/// extractor.
pub struct PageSource<F, X>
where
    F: Fetcher,
    X: PageExtractor,
{
    name: String,
    urls: Vec<String>,
    fetcher: F,
    extractor: X,
    limiter: RateLimiter,
    jitter: RequestJitter,
    retry: RetryPolicy,
    detector: AntiBotDetector,
    metrics: Arc<dyn MetricsSink>,
}

impl<F, X> PageSource<F, X>
where
    F: Fetcher,
    X: PageExtractor,
{
    pub fn new(
        name: impl Into<String>,
        urls: Vec<String>,
        fetcher: F,
        extractor: X,
        config: &SourceConfig,
    ) -> Self {
        Self {
            name: name.into(),
            urls,
            fetcher,
            extractor,
            limiter: RateLimiter::new(config.effective_rate_limit()),
            jitter: RequestJitter::from_config(config),
            retry: RetryPolicy::from_config(config),
            detector: AntiBotDetector::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_detector(mut self, detector: AntiBotDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn enter(&self, url: &str, state: SourceState) {
        tracing::trace!(source = %self.name, %url, %state, "source state");
    }

    /// One pass through the pipeline for `url`, no retries.
    async fn attempt(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, AppError> {
        self.enter(url, SourceState::RateWaiting);
        self.limiter.wait(cancel).await?;

        self.enter(url, SourceState::Jittering);
        self.jitter.delay(cancel).await?;

        self.enter(url, SourceState::Fetching);
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            res = self.fetcher.fetch(url) => res?,
        };

        self.detector.inspect(&page)?;

        self.enter(url, SourceState::Parsing);
        let candidates = self.extractor.extract(&page)?;

        self.enter(url, SourceState::Extracting);
        let total = candidates.len();
        let records: Vec<Record> = candidates
            .into_iter()
            .filter(Record::is_extractable)
            .collect();
        if records.len() < total {
            tracing::debug!(
                source = %self.name,
                dropped = total - records.len(),
                "Dropped records without a usable price or name"
            );
        }

        if records.is_empty() {
            return Err(AppError::EmptyResult(page.url));
        }
        Ok(records)
    }

    /// Fetch-and-extract `url`, retrying transient failures.
    ///
    /// Returns the last observed error once attempts run out.
    async fn scrape_url(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, AppError> {
        self.enter(url, SourceState::Idle);
        let mut history: Vec<ErrorKind> = Vec::new();
        let mut attempt = 0;

        loop {
            match self.attempt(url, cancel).await {
                Ok(records) => {
                    self.enter(url, SourceState::Succeeded);
                    tracing::info!(
                        source = %self.name,
                        %url,
                        records = records.len(),
                        attempts = attempt + 1,
                        "Extracted records"
                    );
                    return Ok(records);
                }
                Err(err) => {
                    self.metrics.record_error(&self.name, err.kind());
                    history.push(err.kind());

                    if !err.is_retryable() {
                        self.enter(url, SourceState::Failed);
                        return Err(err);
                    }

                    self.enter(url, SourceState::after_failure(&err));
                    if !self.retry.has_attempts_after(attempt) {
                        self.enter(url, SourceState::Failed);
                        let history: Vec<_> = history.iter().map(ErrorKind::as_str).collect();
                        tracing::warn!(
                            source = %self.name,
                            %url,
                            attempts = attempt + 1,
                            ?history,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err);
                    }

                    tracing::debug!(
                        source = %self.name,
                        %url,
                        attempt,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    self.retry.wait(attempt, cancel).await?;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<F, X> Source for PageSource<F, X>
where
    F: Fetcher + 'static,
    X: PageExtractor + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn can_scrape(&self) -> bool {
        self.limiter.allow()
    }

    /// Scrape every URL. Records from successful URLs are combined; a failed
    /// URL is skipped when another one succeeded, otherwise its error is
    /// returned. Cancellation aborts immediately.
    async fn scrape(&self, cancel: &CancellationToken) -> Result<Vec<Record>, AppError> {
        if self.urls.is_empty() {
            return Err(AppError::ConfigError(format!(
                "source '{}' has no URLs",
                self.name
            )));
        }

        let mut records = Vec::new();
        let mut succeeded = 0usize;
        let mut last_error = None;

        for url in &self.urls {
            match self.scrape_url(url, cancel).await {
                Ok(mut found) => {
                    succeeded += 1;
                    records.append(&mut found);
                }
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => {
                    tracing::warn!(source = %self.name, %url, error = %e, "URL failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(records),
        }
    }
}
