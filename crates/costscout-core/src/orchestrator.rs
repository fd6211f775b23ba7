use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, CombinedError, SourceFailure};
use crate::metrics::{MetricsSink, NoopMetrics, RunStatus};
use crate::models::ScrapeResult;
use crate::report::RunAccountant;
use crate::traits::{RecordStore, Source, Validator};
use crate::validation::ValidationGate;

/// A terminal run error together with everything counted before it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {}", .result.scraper_name, .error)]
pub struct RunFailure {
    pub result: ScrapeResult,
    #[source]
    pub error: AppError,
}

/// Outcome of [`ScraperService::run_all_scrapers`].
#[derive(Debug, Clone)]
pub struct RunAllReport {
    /// One entry per registered source, in registration order.
    pub results: Vec<ScrapeResult>,
    /// Present only when at least one source failed.
    pub error: Option<CombinedError>,
}

impl RunAllReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Registry of sources plus the run pipeline:
/// scrape → validate → persist, with accounting and metrics.
///
/// Generic over the validator and the store; sources are trait objects so
/// differently-typed sites can share one registry.
pub struct ScraperService<V, S>
where
    V: Validator,
    S: RecordStore,
{
    sources: RwLock<Vec<Arc<dyn Source>>>,
    gate: ValidationGate<V>,
    store: S,
    metrics: Arc<dyn MetricsSink>,
}

impl<V, S> ScraperService<V, S>
where
    V: Validator,
    S: RecordStore,
{
    pub fn new(gate: ValidationGate<V>, store: S) -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            gate,
            store,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    fn read_sources(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn Source>>> {
        self.sources.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_sources(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn Source>>> {
        self.sources.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a source. A source with the same name is replaced in place.
    pub fn register_scraper(&self, source: Arc<dyn Source>) {
        let mut sources = self.write_sources();
        match sources.iter_mut().find(|s| s.name() == source.name()) {
            Some(slot) => {
                tracing::info!(source = %source.name(), "Replacing registered source");
                *slot = source;
            }
            None => {
                tracing::debug!(source = %source.name(), "Registered source");
                sources.push(source);
            }
        }
    }

    /// Names of all registered sources, in registration order.
    pub fn list_scrapers(&self) -> Vec<String> {
        self.read_sources()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.read_sources().iter().find(|s| s.name() == name).cloned()
    }

    /// Run one source end to end.
    ///
    /// Save failures are counted, not fatal. Any other failure is returned
    /// as a [`RunFailure`] carrying the partial result.
    pub async fn run_scraper(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResult, RunFailure> {
        let mut acc = RunAccountant::start(name);

        let Some(source) = self.lookup(name) else {
            return Err(self.fail(acc, AppError::NotFound(format!("scraper '{name}'"))));
        };

        if !source.can_scrape() {
            tracing::info!(source = %name, "Rate limited, skipping run");
            return Err(self.fail(acc, AppError::RateLimitExceeded(name.to_string())));
        }

        tracing::info!(source = %name, "Starting scrape");
        // Per-attempt errors are recorded by the source itself.
        let records = match source.scrape(cancel).await {
            Ok(records) => records,
            Err(e) => {
                acc.error(e.clone());
                return Err(self.finish_failure(acc, e));
            }
        };
        acc.fetched(records.len());
        self.metrics.record_items(name, records.len() as u64);

        let outcome = match self.gate.filter(records).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(acc, e)),
        };
        tracing::info!(
            source = %name,
            total = outcome.summary.total,
            valid = outcome.summary.valid,
            invalid = outcome.summary.invalid,
            low_quality = outcome.summary.low_quality,
            skipped = outcome.summary.skipped,
            "Validation complete"
        );
        acc.validation(outcome.summary);
        if let Some(degraded) = outcome.degraded {
            self.metrics.record_error(name, degraded.kind());
            acc.error(degraded);
        }

        for record in &outcome.accepted {
            if cancel.is_cancelled() {
                return Err(self.fail(acc, AppError::Cancelled));
            }
            match self.store.create(record).await {
                Ok(id) => {
                    tracing::debug!(source = %name, %id, item = %record.item_name, "Saved record");
                    acc.saved();
                }
                Err(e) => {
                    let e = match e {
                        e @ AppError::SaveError(_) => e,
                        other => AppError::SaveError(other.to_string()),
                    };
                    tracing::warn!(
                        source = %name,
                        item = %record.item_name,
                        error = %e,
                        "Failed to save record"
                    );
                    self.metrics.record_error(name, e.kind());
                    acc.save_failed(e);
                }
            }
        }

        let result = acc.finish();
        tracing::info!(
            source = %name,
            fetched = result.fetched,
            saved = result.saved,
            save_failures = result.save_failures,
            duration_ms = %result.duration.as_millis(),
            "Scrape complete"
        );
        self.metrics.record_run(name, RunStatus::Success);
        self.metrics.record_duration(name, result.duration);
        Ok(result)
    }

    /// Run every registered source sequentially. One source failing does not
    /// stop the others.
    pub async fn run_all_scrapers(&self, cancel: &CancellationToken) -> RunAllReport {
        let names = self.list_scrapers();
        let mut results = Vec::with_capacity(names.len());
        let mut failures = Vec::new();

        for name in names {
            match self.run_scraper(&name, cancel).await {
                Ok(result) => results.push(result),
                Err(RunFailure { result, error }) => {
                    failures.push(SourceFailure {
                        source: name,
                        error,
                    });
                    results.push(result);
                }
            }
        }

        let error = CombinedError::from_failures(failures);
        if let Some(err) = &error {
            tracing::warn!(
                failed = err.failures.len(),
                total = results.len(),
                "Some scrapers failed"
            );
        }
        RunAllReport { results, error }
    }

    /// Record a failure the source never saw and build the [`RunFailure`].
    fn fail(&self, mut acc: RunAccountant, error: AppError) -> RunFailure {
        self.metrics.record_error(acc.name(), error.kind());
        acc.error(error.clone());
        self.finish_failure(acc, error)
    }

    fn finish_failure(&self, acc: RunAccountant, error: AppError) -> RunFailure {
        let result = acc.finish();
        tracing::warn!(source = %result.scraper_name, error = %error, "Scrape failed");
        self.metrics.record_run(&result.scraper_name, RunStatus::Failure);
        self.metrics.record_duration(&result.scraper_name, result.duration);
        RunFailure { result, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metrics::InMemoryMetrics;
    use crate::models::{Record, ValidationOutcome};
    use crate::testutil::*;
    use crate::validation::GateConfig;

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| make_test_record(&format!("item {i}"), 10.0 + i as f64))
            .collect()
    }

    fn service(
        validator: MockValidator,
        store: MockStore,
    ) -> (ScraperService<MockValidator, MockStore>, Arc<InMemoryMetrics>) {
        let metrics = Arc::new(InMemoryMetrics::new());
        let svc = ScraperService::new(ValidationGate::new(validator, GateConfig::default()), store)
            .with_metrics(metrics.clone());
        (svc, metrics)
    }

    #[tokio::test]
    async fn validation_filters_before_save() {
        let mut outcomes = vec![ValidationOutcome::valid(0.9); 5];
        outcomes.extend(vec![ValidationOutcome::invalid(vec!["bad".into()]); 3]);
        outcomes.extend(vec![ValidationOutcome::valid(0.1); 2]);
        let store = MockStore::empty();
        let (svc, metrics) = service(MockValidator::new(outcomes), store.clone());
        svc.register_scraper(Arc::new(MockSource::new("lowes", records(10))));

        let result = svc.run_scraper("lowes", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.fetched, 10);
        assert_eq!(result.saved, 5);
        assert_eq!(result.validation.total, 10);
        assert_eq!(result.validation.valid, 5);
        assert_eq!(result.validation.invalid, 3);
        assert_eq!(result.validation.low_quality, 2);
        assert_eq!(store.saved_count(), 5);
        assert_eq!(metrics.items("lowes"), 10);
        assert_eq!(metrics.runs("lowes", RunStatus::Success), 1);
        assert_eq!(metrics.durations("lowes").len(), 1);
    }

    #[tokio::test]
    async fn partial_save_failure_is_not_fatal() {
        let store = MockStore::failing_on(vec![2]);
        let (svc, metrics) = service(MockValidator::accepting(3, 0.9), store.clone());
        svc.register_scraper(Arc::new(MockSource::new("lowes", records(3))));

        let result = svc.run_scraper("lowes", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.saved, 2);
        assert_eq!(result.save_failures, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], AppError::SaveError(_)));
        assert_eq!(metrics.errors("lowes", ErrorKind::Save), 1);
        assert_eq!(metrics.runs("lowes", RunStatus::Success), 1);
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let (svc, metrics) = service(MockValidator::new(vec![]), MockStore::empty());

        let failure = svc.run_scraper("nope", &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(failure.error, AppError::NotFound(_)));
        assert_eq!(failure.result.scraper_name, "nope");
        assert_eq!(failure.result.errors, vec![failure.error.clone()]);
        assert_eq!(metrics.runs("nope", RunStatus::Failure), 1);
        assert_eq!(metrics.errors("nope", ErrorKind::NotFound), 1);
    }

    #[tokio::test]
    async fn rate_limited_source_is_not_invoked() {
        let source = MockSource::new("lowes", records(2)).not_ready();
        let (svc, metrics) = service(MockValidator::accepting(2, 0.9), MockStore::empty());
        svc.register_scraper(Arc::new(source.clone()));

        let failure = svc.run_scraper("lowes", &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(failure.error, AppError::RateLimitExceeded(_)));
        assert_eq!(source.call_count(), 0);
        assert_eq!(metrics.errors("lowes", ErrorKind::RateLimited), 1);
    }

    #[tokio::test]
    async fn scrape_error_skips_persistence() {
        let store = MockStore::empty();
        let validator = MockValidator::accepting(1, 0.9);
        let (svc, metrics) = service(validator.clone(), store.clone());
        svc.register_scraper(Arc::new(MockSource::failing(
            "lowes",
            AppError::BadStatus {
                url: "https://lowes.example.com".into(),
                status: 500,
            },
        )));

        let failure = svc.run_scraper("lowes", &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(failure.error, AppError::BadStatus { status: 500, .. }));
        assert_eq!(failure.result.errors.len(), 1);
        assert_eq!(store.saved_count(), 0);
        assert_eq!(*validator.calls.lock().unwrap(), 0);
        assert_eq!(metrics.runs("lowes", RunStatus::Failure), 1);
        // the source owns per-attempt error metrics
        assert_eq!(metrics.errors("lowes", ErrorKind::BadStatus), 0);
    }

    #[tokio::test]
    async fn hardened_validator_failure_is_terminal() {
        let store = MockStore::empty();
        let gate = ValidationGate::new(
            MockValidator::with_error(AppError::ValidationError("boom".into())),
            GateConfig::default().with_fail_on_validation(true),
        );
        let svc = ScraperService::new(gate, store.clone());
        svc.register_scraper(Arc::new(MockSource::new("lowes", records(2))));

        let failure = svc.run_scraper("lowes", &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(failure.error, AppError::ValidationError(_)));
        assert_eq!(failure.result.fetched, 2);
        assert_eq!(store.saved_count(), 0);
    }

    #[tokio::test]
    async fn permissive_validator_failure_still_saves() {
        let store = MockStore::empty();
        let (svc, _) = service(
            MockValidator::with_error(AppError::ValidationError("boom".into())),
            store.clone(),
        );
        svc.register_scraper(Arc::new(MockSource::new("lowes", records(2))));

        let result = svc.run_scraper("lowes", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.saved, 2);
        assert!(result.validation.skipped);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn run_all_isolates_failures() {
        let (svc, metrics) = service(MockValidator::accepting(2, 0.9), MockStore::empty());
        svc.register_scraper(Arc::new(MockSource::failing(
            "homedepot",
            AppError::Blocked {
                url: "https://homedepot.example.com".into(),
                reason: "captcha".into(),
            },
        )));
        svc.register_scraper(Arc::new(MockSource::new("lowes", records(2))));

        let report = svc.run_all_scrapers(&CancellationToken::new()).await;

        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].scraper_name, "homedepot");
        assert_eq!(report.results[1].saved, 2);
        let err = report.error.expect("one source failed");
        assert_eq!(err.sources().collect::<Vec<_>>(), vec!["homedepot"]);
        assert_eq!(metrics.total_runs(), 2);
    }

    #[tokio::test]
    async fn run_all_with_no_failures_has_no_error() {
        let (svc, _) = service(MockValidator::accepting(1, 0.9), MockStore::empty());
        svc.register_scraper(Arc::new(MockSource::new("a", records(1))));
        svc.register_scraper(Arc::new(MockSource::new("b", records(1))));

        let report = svc.run_all_scrapers(&CancellationToken::new()).await;
        assert!(report.is_success());
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn reregistering_replaces_in_place() {
        let (svc, _) = service(MockValidator::accepting(3, 0.9), MockStore::empty());
        svc.register_scraper(Arc::new(MockSource::new("a", records(1))));
        svc.register_scraper(Arc::new(MockSource::new("b", records(1))));
        svc.register_scraper(Arc::new(MockSource::new("a", records(3))));

        assert_eq!(svc.list_scrapers(), vec!["a", "b"]);
        let result = svc.run_scraper("a", &CancellationToken::new()).await.unwrap();
        assert_eq!(result.fetched, 3);
    }

    #[tokio::test]
    async fn cancelled_run_reports_cancelled() {
        let store = MockStore::empty();
        let (svc, _) = service(MockValidator::accepting(2, 0.9), store.clone());
        svc.register_scraper(Arc::new(MockSource::new("lowes", records(2))));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let failure = svc.run_scraper("lowes", &cancel).await.unwrap_err();
        assert_eq!(failure.error, AppError::Cancelled);
        assert_eq!(store.saved_count(), 0);
    }

    #[tokio::test]
    async fn cancel_during_saving_keeps_saved_records() {
        let cancel = CancellationToken::new();
        let store = MockStore::empty().cancelling_after(2, cancel.clone());
        let (svc, metrics) = service(MockValidator::accepting(5, 0.9), store.clone());
        svc.register_scraper(Arc::new(MockSource::new("lowes", records(5))));

        let failure = svc.run_scraper("lowes", &cancel).await.unwrap_err();

        assert_eq!(failure.error, AppError::Cancelled);
        assert_eq!(failure.result.saved, 2);
        assert_eq!(store.saved_count(), 2);
        assert_eq!(metrics.errors("lowes", ErrorKind::Cancelled), 1);
        assert_eq!(metrics.runs("lowes", RunStatus::Failure), 1);
    }

    #[tokio::test]
    async fn database_errors_are_counted_as_save_errors() {
        let store = MockStore::failing_on(vec![1, 3]).with_database_errors();
        let (svc, metrics) = service(MockValidator::accepting(3, 0.9), store.clone());
        svc.register_scraper(Arc::new(MockSource::new("lowes", records(3))));

        let result = svc.run_scraper("lowes", &CancellationToken::new()).await.unwrap();

        assert_eq!(result.saved, 1);
        assert_eq!(result.save_failures, 2);
        for error in &result.errors {
            assert_eq!(error.kind(), ErrorKind::Save);
            assert!(error.to_string().contains("connection reset"));
        }
        assert_eq!(metrics.errors("lowes", ErrorKind::Save), 2);
        assert_eq!(metrics.errors("lowes", ErrorKind::Database), 0);
    }

    #[tokio::test]
    async fn empty_registry_lists_nothing() {
        let (svc, _) = service(MockValidator::new(vec![]), MockStore::empty());
        assert!(svc.list_scrapers().is_empty());
        let report = svc.run_all_scrapers(&CancellationToken::new()).await;
        assert!(report.results.is_empty());
        assert!(report.is_success());
    }
}
