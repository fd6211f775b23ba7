use std::fmt;

use thiserror::Error;

/// Application-wide error types for costscout.
///
/// Cloneable so that a run can keep a copy of every error in its
/// [`ScrapeResult`](crate::models::ScrapeResult) while still returning the
/// terminal one to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    /// Pre-flight admission refused; no network call was made.
    #[error("Rate limit exceeded for source '{0}'")]
    RateLimitExceeded(String),

    /// The run was cancelled at a suspension point.
    #[error("Operation cancelled")]
    Cancelled,

    /// Transport-level failure (DNS, connect, reset, body read).
    #[error("Fetch error: {0}")]
    FetchError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The site is actively resisting us (403/429 or a challenge page).
    #[error("Blocked by {url}: {reason}")]
    Blocked { url: String, reason: String },

    /// Non-success HTTP status that is not a block.
    #[error("HTTP {status} for {url}")]
    BadStatus { url: String, status: u16 },

    /// The fetched document could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Well-formed page with no extractable records.
    #[error("No records extracted from {0}")]
    EmptyResult(String),

    /// The validator itself failed.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// One record failed to persist.
    #[error("Save error: {0}")]
    SaveError(String),

    /// No scraper registered under this name.
    #[error("Scraper not found: {0}")]
    NotFound(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::SerializationError(e.to_string())
    }
}

/// Coarse failure class, used as a metrics label and for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    RateLimited,
    Cancelled,
    Fetch,
    Blocked,
    BadStatus,
    Parse,
    Empty,
    Validation,
    Save,
    NotFound,
    Config,
    Database,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Blocked => "blocked",
            ErrorKind::BadStatus => "bad_status",
            ErrorKind::Parse => "parse",
            ErrorKind::Empty => "empty",
            ErrorKind::Validation => "validation",
            ErrorKind::Save => "save",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Config => "config",
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::RateLimitExceeded(_) => ErrorKind::RateLimited,
            AppError::Cancelled => ErrorKind::Cancelled,
            AppError::FetchError(_) | AppError::Timeout(_) => ErrorKind::Fetch,
            AppError::Blocked { .. } => ErrorKind::Blocked,
            AppError::BadStatus { .. } => ErrorKind::BadStatus,
            AppError::ParseError(_) => ErrorKind::Parse,
            AppError::EmptyResult(_) => ErrorKind::Empty,
            AppError::ValidationError(_) => ErrorKind::Validation,
            AppError::SaveError(_) => ErrorKind::Save,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::ConfigError(_) => ErrorKind::Config,
            AppError::DatabaseError(_) => ErrorKind::Database,
            AppError::SerializationError(_) => ErrorKind::Serialization,
        }
    }

    /// Returns true if the source loop should try this fetch again.
    ///
    /// Rate-limit refusals and cancellations are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Fetch
                | ErrorKind::Blocked
                | ErrorKind::BadStatus
                | ErrorKind::Parse
                | ErrorKind::Empty
        )
    }
}

impl serde::Serialize for AppError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One source's terminal error inside a [`CombinedError`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: String,
    pub error: AppError,
}

/// Join of every per-source error from a run-all pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedError {
    pub failures: Vec<SourceFailure>,
}

impl CombinedError {
    /// Returns `None` when there is nothing to report.
    pub fn from_failures(failures: Vec<SourceFailure>) -> Option<Self> {
        if failures.is_empty() {
            None
        } else {
            Some(Self { failures })
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.source.as_str())
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.source, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for CombinedError {}
