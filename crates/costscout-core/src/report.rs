use std::time::Instant;

use crate::error::AppError;
use crate::models::{ScrapeResult, ValidationSummary};

/// Accumulates the counts of one run into a [`ScrapeResult`].
///
/// Created at run start; `finish` stamps the elapsed time and hands the
/// result out.
#[derive(Debug)]
pub struct RunAccountant {
    result: ScrapeResult,
    started: Instant,
}

impl RunAccountant {
    pub fn start(scraper_name: impl Into<String>) -> Self {
        Self {
            result: ScrapeResult::new(scraper_name),
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.result.scraper_name
    }

    pub fn fetched(&mut self, count: usize) {
        self.result.fetched += count;
    }

    pub fn validation(&mut self, summary: ValidationSummary) {
        self.result.validation = summary;
    }

    pub fn saved(&mut self) {
        self.result.saved += 1;
    }

    pub fn save_failed(&mut self, error: AppError) {
        self.result.save_failures += 1;
        self.result.errors.push(error);
    }

    pub fn error(&mut self, error: AppError) {
        self.result.errors.push(error);
    }

    pub fn finish(mut self) -> ScrapeResult {
        self.result.duration = self.started.elapsed();
        self.result
    }
}
