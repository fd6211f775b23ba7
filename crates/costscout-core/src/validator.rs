//! Rule-based record validator.
//!
//! Hard rules decide validity; soft completeness checks lower the quality
//! score. The score blends completeness with the record's extraction
//! confidence, so fallback-extracted records need to be more complete to
//! clear the same threshold.

use chrono::{Duration as TimeDelta, Utc};

use crate::error::AppError;
use crate::models::{Record, ValidationOutcome};
use crate::traits::Validator;

#[derive(Debug, Clone, PartialEq)]
pub struct RuleConfig {
    /// Prices below this are considered junk (e.g. "$0.01" placeholders).
    pub min_price: f64,
    pub max_price: f64,
    /// Allowed clock skew for `recorded_at`.
    pub max_future_skew: TimeDelta,
    /// Weight of completeness vs. confidence in the score.
    pub completeness_weight: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            min_price: 0.01,
            max_price: 10_000_000.0,
            max_future_skew: TimeDelta::minutes(5),
            completeness_weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleValidator {
    config: RuleConfig,
}

impl RuleValidator {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, record: &Record) -> ValidationOutcome {
        let errors = self.hard_errors(record);
        if !errors.is_empty() {
            return ValidationOutcome::invalid(errors);
        }

        let w = self.config.completeness_weight.clamp(0.0, 1.0);
        let score = w * completeness(record) + (1.0 - w) * record.confidence;
        ValidationOutcome::valid(score.clamp(0.0, 1.0))
    }

    fn hard_errors(&self, r: &Record) -> Vec<String> {
        let mut errors = Vec::new();

        if r.item_name.trim().is_empty() {
            errors.push("item name is empty".to_string());
        }
        if r.category.trim().is_empty() {
            errors.push("category is empty".to_string());
        }
        if !r.price.is_finite() || r.price <= 0.0 {
            errors.push(format!("price must be positive, got {}", r.price));
        } else if r.price < self.config.min_price || r.price > self.config.max_price {
            errors.push(format!(
                "price {} outside [{}, {}]",
                r.price, self.config.min_price, self.config.max_price
            ));
        }
        if !(r.confidence > 0.0 && r.confidence <= 1.0) {
            errors.push(format!("confidence {} outside (0, 1]", r.confidence));
        }
        if let Some(min) = r.price_min
            && min > r.price
        {
            errors.push(format!("price_min {min} above price {}", r.price));
        }
        if let Some(max) = r.price_max
            && max < r.price
        {
            errors.push(format!("price_max {max} below price {}", r.price));
        }
        if let Some(to) = r.valid_to
            && to < r.valid_from
        {
            errors.push("valid_to precedes valid_from".to_string());
        }
        if r.recorded_at > Utc::now() + self.config.max_future_skew {
            errors.push("recorded_at is in the future".to_string());
        }

        errors
    }
}

/// Fraction of optional-but-expected fields that are present.
fn completeness(r: &Record) -> f64 {
    let mut score: f64 = 1.0;
    if r.location.trim().is_empty() {
        score -= 0.2;
    }
    if r.unit.trim().is_empty() {
        score -= 0.1;
    }
    if r.source_url.trim().is_empty() {
        score -= 0.15;
    }
    if r.subcategory.as_deref().is_none_or(|s| s.trim().is_empty()) {
        score -= 0.05;
    }
    if r.item_name.trim().chars().count() < 3 {
        score -= 0.2;
    }
    score.max(0.0)
}

impl Validator for RuleValidator {
    async fn validate_batch(&self, records: &[Record]) -> Result<Vec<ValidationOutcome>, AppError> {
        Ok(records.iter().map(|r| self.validate(r)).collect())
    }
}
