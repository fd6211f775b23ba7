//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{FetchedPage, Record, ValidationOutcome};
use crate::traits::{Fetcher, PageExtractor, RecordStore, Source, Validator};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that replays a queue of responses.
#[derive(Clone)]
pub struct MockFetcher {
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default 200 page.
    responses: Arc<Mutex<Vec<Result<FetchedPage, AppError>>>>,
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl MockFetcher {
    pub fn new(html: &str) -> Self {
        Self::with_responses(vec![Ok(FetchedPage::ok("https://example.com", html))])
    }

    pub fn with_responses(responses: Vec<Result<FetchedPage, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        self.calls.lock().unwrap().push(Instant::now());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(FetchedPage::ok(url, "<html><body>default</body></html>"))
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor that replays batches; the last batch repeats.
#[derive(Clone)]
pub struct MockExtractor {
    batches: Arc<Mutex<Vec<Result<Vec<Record>, AppError>>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockExtractor {
    pub fn new(records: Vec<Record>) -> Self {
        Self::with_batches(vec![Ok(records)])
    }

    pub fn with_batches(batches: Vec<Result<Vec<Record>, AppError>>) -> Self {
        Self {
            batches: Arc::new(Mutex::new(batches)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl PageExtractor for MockExtractor {
    fn extract(&self, _page: &FetchedPage) -> Result<Vec<Record>, AppError> {
        *self.calls.lock().unwrap() += 1;
        let mut batches = self.batches.lock().unwrap();
        match batches.len() {
            0 => Ok(Vec::new()),
            1 => batches[0].clone(),
            _ => batches.remove(0),
        }
    }
}

// ---------------------------------------------------------------------------
// MockValidator
// ---------------------------------------------------------------------------

/// Mock validator returning a fixed outcome list or an error.
#[derive(Clone)]
pub struct MockValidator {
    outcomes: Arc<Mutex<Result<Vec<ValidationOutcome>, AppError>>>,
    pub calls: Arc<Mutex<usize>>,
}

impl MockValidator {
    pub fn new(outcomes: Vec<ValidationOutcome>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(Ok(outcomes))),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Every record valid with the given score.
    pub fn accepting(count: usize, score: f64) -> Self {
        Self::new(vec![ValidationOutcome::valid(score); count])
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(Err(error))),
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

impl Validator for MockValidator {
    async fn validate_batch(
        &self,
        _records: &[Record],
    ) -> Result<Vec<ValidationOutcome>, AppError> {
        *self.calls.lock().unwrap() += 1;
        self.outcomes.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// Mock store that records saves; optionally fails specific calls.
#[derive(Clone)]
pub struct MockStore {
    pub saved: Arc<Mutex<Vec<Record>>>,
    calls: Arc<Mutex<usize>>,
    /// 1-based call numbers that fail.
    fail_on: Arc<Vec<usize>>,
    /// Fail like the database does instead of with `SaveError`.
    database_errors: bool,
    /// Cancel this token once this many records are saved.
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MockStore {
    pub fn empty() -> Self {
        Self::failing_on(vec![])
    }

    pub fn failing_on(calls: Vec<usize>) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(0)),
            fail_on: Arc::new(calls),
            database_errors: false,
            cancel_after: None,
        }
    }

    pub fn with_database_errors(mut self) -> Self {
        self.database_errors = true;
        self
    }

    pub fn cancelling_after(mut self, saves: usize, cancel: CancellationToken) -> Self {
        self.cancel_after = Some((saves, cancel));
        self
    }

    pub fn saved_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }
}

impl RecordStore for MockStore {
    async fn create(&self, record: &Record) -> Result<Uuid, AppError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if self.fail_on.contains(&call) {
            return Err(if self.database_errors {
                AppError::DatabaseError(format!("connection reset on insert {call}"))
            } else {
                AppError::SaveError(format!("insert {call} rejected"))
            });
        }
        let saved = {
            let mut saved = self.saved.lock().unwrap();
            saved.push(record.clone());
            saved.len()
        };
        if let Some((after, cancel)) = &self.cancel_after
            && saved >= *after
        {
            cancel.cancel();
        }
        Ok(Uuid::new_v4())
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Mock source with a fixed readiness and scrape result.
#[derive(Clone)]
pub struct MockSource {
    name: String,
    ready: bool,
    result: Result<Vec<Record>, AppError>,
    pub calls: Arc<Mutex<usize>>,
}

impl MockSource {
    pub fn new(name: &str, records: Vec<Record>) -> Self {
        Self {
            name: name.to_string(),
            ready: true,
            result: Ok(records),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing(name: &str, error: AppError) -> Self {
        Self {
            result: Err(error),
            ..Self::new(name, vec![])
        }
    }

    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Source for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_scrape(&self) -> bool {
        self.ready
    }

    async fn scrape(&self, cancel: &CancellationToken) -> Result<Vec<Record>, AppError> {
        *self.calls.lock().unwrap() += 1;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        self.result.clone()
    }
}

// ---------------------------------------------------------------------------
// Factory functions
// ---------------------------------------------------------------------------

/// Fully populated record that passes the rule validator comfortably.
pub fn make_test_record(item_name: &str, price: f64) -> Record {
    let mut record = Record::new("test-source", "tools", item_name, price);
    record.subcategory = Some("power tools".to_string());
    record.location = "Austin, TX".to_string();
    record.unit = "each".to_string();
    record.source_url = "https://shop.example.com/tools".to_string();
    record.confidence = 0.9;
    record
}
