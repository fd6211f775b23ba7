use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{FetchedPage, Record, ValidationOutcome};

/// Performs one HTTP round-trip.
///
/// Non-success statuses are returned as a [`FetchedPage`], not as errors;
/// only transport failures are `Err`.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;
}

/// Turns a fetched page into candidate records.
pub trait PageExtractor: Send + Sync {
    fn extract(&self, page: &FetchedPage) -> Result<Vec<Record>, AppError>;
}

/// Scores a batch of records. Must return one outcome per record, in order.
pub trait Validator: Send + Sync {
    fn validate_batch(
        &self,
        records: &[Record],
    ) -> impl Future<Output = Result<Vec<ValidationOutcome>, AppError>> + Send;
}

/// Persists records one at a time. Returns the generated id.
pub trait RecordStore: Send + Sync {
    fn create(&self, record: &Record) -> impl Future<Output = Result<Uuid, AppError>> + Send;
}

/// One site scraper, as seen by the orchestrator.
///
/// Object safe so that sources of different concrete types can live in one
/// registry.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Pre-flight admission check. Must not block.
    fn can_scrape(&self) -> bool;

    async fn scrape(&self, cancel: &CancellationToken) -> Result<Vec<Record>, AppError>;
}

/// A no-op RecordStore for dry runs.
#[derive(Debug, Clone)]
pub struct NullStore;

impl RecordStore for NullStore {
    async fn create(&self, _record: &Record) -> Result<Uuid, AppError> {
        Ok(Uuid::nil())
    }
}
