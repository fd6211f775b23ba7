//! Quality gate between extraction and persistence.
//!
//! The gate is permissive by default: if the validator itself fails, the
//! batch goes through unfiltered unless `fail_on_validation` is set. A flaky
//! validator must not stop data collection.

use crate::error::AppError;
use crate::models::{Record, ValidationSummary};
use crate::traits::Validator;

#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub enable_validation: bool,
    pub validate_before_save: bool,
    /// Minimum score for a valid record to be kept.
    pub min_quality_score: f64,
    pub fail_on_validation: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enable_validation: true,
            validate_before_save: true,
            min_quality_score: 0.5,
            fail_on_validation: false,
        }
    }
}

impl GateConfig {
    pub fn disabled() -> Self {
        Self {
            enable_validation: false,
            ..Self::default()
        }
    }

    pub fn with_min_quality_score(mut self, score: f64) -> Self {
        self.min_quality_score = score;
        self
    }

    pub fn with_fail_on_validation(mut self, fail: bool) -> Self {
        self.fail_on_validation = fail;
        self
    }
}

/// Records that survived the gate, plus the counts.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub accepted: Vec<Record>,
    pub summary: ValidationSummary,
    /// The validator error swallowed in permissive mode, if any.
    pub degraded: Option<AppError>,
}

pub struct ValidationGate<V: Validator> {
    validator: V,
    config: GateConfig,
}

impl<V: Validator> ValidationGate<V> {
    pub fn new(validator: V, config: GateConfig) -> Self {
        Self { validator, config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Validate the batch once and keep what passes.
    ///
    /// Errors only when the validator fails and `fail_on_validation` is set.
    pub async fn filter(&self, records: Vec<Record>) -> Result<GateOutcome, AppError> {
        let total = records.len();

        if !self.config.enable_validation || !self.config.validate_before_save {
            return Ok(GateOutcome {
                accepted: records,
                summary: ValidationSummary::skipped(total),
                degraded: None,
            });
        }

        if records.is_empty() {
            return Ok(GateOutcome {
                accepted: records,
                summary: ValidationSummary::default(),
                degraded: None,
            });
        }

        let outcomes = match self.validator.validate_batch(&records).await {
            Ok(outcomes) if outcomes.len() == total => outcomes,
            Ok(outcomes) => {
                let err = AppError::ValidationError(format!(
                    "validator returned {} outcomes for {} records",
                    outcomes.len(),
                    total
                ));
                return self.on_validator_failure(records, err);
            }
            Err(e) => return self.on_validator_failure(records, e),
        };

        let mut summary = ValidationSummary {
            total,
            ..ValidationSummary::default()
        };
        let mut accepted = Vec::with_capacity(total);

        for (record, outcome) in records.into_iter().zip(outcomes) {
            if !outcome.is_valid {
                summary.invalid += 1;
                tracing::debug!(
                    item = %record.item_name,
                    errors = ?outcome.errors,
                    "Record invalid"
                );
            } else if outcome.score < self.config.min_quality_score {
                summary.low_quality += 1;
                tracing::debug!(
                    item = %record.item_name,
                    score = outcome.score,
                    min = self.config.min_quality_score,
                    "Record below quality threshold"
                );
            } else {
                summary.valid += 1;
                accepted.push(record);
            }
        }

        Ok(GateOutcome {
            accepted,
            summary,
            degraded: None,
        })
    }

    fn on_validator_failure(
        &self,
        records: Vec<Record>,
        err: AppError,
    ) -> Result<GateOutcome, AppError> {
        let err = match err {
            e @ AppError::ValidationError(_) => e,
            other => AppError::ValidationError(other.to_string()),
        };

        if self.config.fail_on_validation {
            return Err(err);
        }

        tracing::warn!(
            error = %err,
            records = records.len(),
            "Validator failed, accepting batch unfiltered"
        );
        Ok(GateOutcome {
            summary: ValidationSummary::skipped(records.len()),
            accepted: records,
            degraded: Some(err),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ValidationOutcome;
    use crate::testutil::*;

    fn batch(n: usize) -> Vec<Record> {
        (0..n).map(|i| make_test_record(&format!("item {i}"), 10.0)).collect()
    }

    #[tokio::test]
    async fn disabled_gate_passes_everything() {
        let validator = MockValidator::new(vec![]);
        let gate = ValidationGate::new(validator.clone(), GateConfig::disabled());

        let out = gate.filter(batch(4)).await.unwrap();
        assert_eq!(out.accepted.len(), 4);
        assert!(out.summary.skipped);
        assert_eq!(out.summary.total, 4);
        assert_eq!(*validator.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn not_validating_before_save_passes_everything() {
        let config = GateConfig {
            validate_before_save: false,
            ..GateConfig::default()
        };
        let gate = ValidationGate::new(MockValidator::new(vec![]), config);

        let out = gate.filter(batch(2)).await.unwrap();
        assert_eq!(out.accepted.len(), 2);
        assert!(out.summary.skipped);
    }

    #[tokio::test]
    async fn classifies_invalid_and_low_quality() {
        let outcomes = vec![
            ValidationOutcome::valid(0.9),
            ValidationOutcome::invalid(vec!["price must be positive".into()]),
            ValidationOutcome::valid(0.2),
            ValidationOutcome::valid(0.5),
        ];
        let gate = ValidationGate::new(MockValidator::new(outcomes), GateConfig::default());

        let out = gate.filter(batch(4)).await.unwrap();
        assert_eq!(out.summary.total, 4);
        assert_eq!(out.summary.valid, 2);
        assert_eq!(out.summary.invalid, 1);
        assert_eq!(out.summary.low_quality, 1);
        assert!(!out.summary.skipped);
        let names: Vec<_> = out.accepted.iter().map(|r| r.item_name.as_str()).collect();
        assert_eq!(names, vec!["item 0", "item 3"]);
    }

    #[tokio::test]
    async fn invalid_with_high_score_is_still_invalid() {
        let outcomes = vec![ValidationOutcome {
            is_valid: false,
            score: 0.99,
            errors: vec!["bad".into()],
        }];
        let gate = ValidationGate::new(MockValidator::new(outcomes), GateConfig::default());

        let out = gate.filter(batch(1)).await.unwrap();
        assert!(out.accepted.is_empty());
        assert_eq!(out.summary.invalid, 1);
        assert_eq!(out.summary.low_quality, 0);
    }

    #[tokio::test]
    async fn validator_error_is_permissive_by_default() {
        let validator = MockValidator::with_error(AppError::ValidationError("timeout".into()));
        let gate = ValidationGate::new(validator, GateConfig::default());

        let out = gate.filter(batch(3)).await.unwrap();
        assert_eq!(out.accepted.len(), 3);
        assert!(out.summary.skipped);
        assert!(matches!(out.degraded, Some(AppError::ValidationError(_))));
    }

    #[tokio::test]
    async fn validator_error_fails_when_hardened() {
        let validator =
            MockValidator::with_error(AppError::FetchError("rules service down".into()));
        let gate = ValidationGate::new(
            validator,
            GateConfig::default().with_fail_on_validation(true),
        );

        let err = gate.filter(batch(3)).await.unwrap_err();
        assert!(
            matches!(err, AppError::ValidationError(msg) if msg.contains("rules service down"))
        );
    }

    #[tokio::test]
    async fn outcome_count_mismatch_is_a_validator_failure() {
        let gate = ValidationGate::new(
            MockValidator::new(vec![ValidationOutcome::valid(1.0)]),
            GateConfig::default().with_fail_on_validation(true),
        );

        let err = gate.filter(batch(2)).await.unwrap_err();
        assert!(err.to_string().contains("1 outcomes for 2 records"));
    }

    #[tokio::test]
    async fn empty_batch_skips_the_validator() {
        let validator = MockValidator::new(vec![]);
        let gate = ValidationGate::new(validator.clone(), GateConfig::default());

        let out = gate.filter(vec![]).await.unwrap();
        assert!(out.accepted.is_empty());
        assert_eq!(out.summary, ValidationSummary::default());
        assert_eq!(*validator.calls.lock().unwrap(), 0);
    }
}
