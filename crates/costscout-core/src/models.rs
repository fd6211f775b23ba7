use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;

/// One priced observation extracted from a source page.
///
/// Never mutated after creation; a correction is a new record with a newer
/// `recorded_at`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub category: String,
    pub subcategory: Option<String>,
    pub item_name: String,
    pub price: f64,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub price_median: Option<f64>,
    pub sample_size: Option<u32>,
    /// ISO 4217 code, e.g. "USD"
    pub currency: String,
    pub location: String,
    /// Identifier of the source that produced the record
    pub source: String,
    pub source_url: String,
    /// How much the extraction method is trusted, in (0, 1].
    pub confidence: f64,
    /// Pricing unit, e.g. "each", "sq ft", "hour"
    pub unit: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Record {
    /// Minimal record with the current time for all timestamps.
    pub fn new(
        source: impl Into<String>,
        category: impl Into<String>,
        item_name: impl Into<String>,
        price: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            category: category.into(),
            subcategory: None,
            item_name: item_name.into(),
            price,
            price_min: None,
            price_max: None,
            price_median: None,
            sample_size: None,
            currency: "USD".to_string(),
            location: String::new(),
            source: source.into(),
            source_url: String::new(),
            confidence: 1.0,
            unit: String::new(),
            tags: Vec::new(),
            attributes: BTreeMap::new(),
            recorded_at: now,
            valid_from: now,
            valid_to: None,
        }
    }

    /// A record is worth emitting only with a positive price, a name and a
    /// confidence in (0, 1].
    pub fn is_extractable(&self) -> bool {
        self.price.is_finite()
            && self.price > 0.0
            && !self.item_name.trim().is_empty()
            && self.confidence > 0.0
            && self.confidence <= 1.0
    }
}

/// Raw result of one HTTP round-trip. Non-success statuses are data here;
/// the source decides what they mean.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(url, 200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Verdict of the validator for one record.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub score: f64,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    pub fn valid(score: f64) -> Self {
        Self {
            is_valid: true,
            score,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            score: 0.0,
            errors,
        }
    }
}

/// Aggregate validation counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub low_quality: usize,
    /// True when records went through unfiltered.
    pub skipped: bool,
}

impl ValidationSummary {
    pub fn skipped(total: usize) -> Self {
        Self {
            total,
            valid: total,
            skipped: true,
            ..Self::default()
        }
    }
}

/// Outcome of one run of a source through the orchestrator.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScrapeResult {
    pub scraper_name: String,
    pub started_at: DateTime<Utc>,
    pub fetched: usize,
    pub validation: ValidationSummary,
    pub saved: usize,
    pub save_failures: usize,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub errors: Vec<AppError>,
}

impl ScrapeResult {
    pub fn new(scraper_name: impl Into<String>) -> Self {
        Self {
            scraper_name: scraper_name.into(),
            started_at: Utc::now(),
            fetched: 0,
            validation: ValidationSummary::default(),
            saved: 0,
            save_failures: 0,
            duration: Duration::ZERO,
            errors: Vec::new(),
        }
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_millis() as u64)
}
