pub mod antibot;
pub mod config;
pub mod error;
pub mod jitter;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod rate_limiter;
pub mod report;
pub mod retry;
pub mod source;
pub mod traits;
pub mod validation;
pub mod validator;

#[cfg(test)]
mod testutil;

pub use antibot::AntiBotDetector;
pub use config::SourceConfig;
pub use error::{AppError, CombinedError, ErrorKind, SourceFailure};
pub use jitter::RequestJitter;
pub use metrics::{
    FanoutMetrics, InMemoryMetrics, MetricsSink, NoopMetrics, RunStatus, TracingMetrics,
};
pub use models::{FetchedPage, Record, ScrapeResult, ValidationOutcome, ValidationSummary};
pub use orchestrator::{RunAllReport, RunFailure, ScraperService};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryPolicy, backoff};
pub use source::{PageSource, SourceState};
pub use traits::{Fetcher, NullStore, PageExtractor, RecordStore, Source, Validator};
pub use validation::{GateConfig, GateOutcome, ValidationGate};
pub use validator::{RuleConfig, RuleValidator};
