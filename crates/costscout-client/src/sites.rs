//! Site definitions: everything that differs between sources, as data.
//!
//! A sites file is a JSON object with a `sites` array:
//!
//! ```json
//! {
//!   "sites": [{
//!     "name": "acme-tools",
//!     "urls": ["https://acme.example.com/c/drills"],
//!     "config": { "rate_limit": 0.5, "min_delay_ms": 500, "max_delay_ms": 2000 },
//!     "profile": { "category": "tools", "unit": "each" },
//!     "strategies": [{
//!       "name": "cards",
//!       "item": "div.product",
//!       "fields": { "name": "h3", "price": ".price" },
//!       "confidence": 0.9
//!     }],
//!     "fallback": { "detail_pattern": "/p/\\d+" }
//!   }]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use costscout_core::antibot::AntiBotDetector;
use costscout_core::config::SourceConfig;
use costscout_core::error::AppError;
use costscout_core::metrics::MetricsSink;
use costscout_core::source::PageSource;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cascade::{ExtractionCascade, FallbackSpec, RecordProfile, StrategySpec};
use crate::fetcher::ReqwestFetcher;

/// A source built from a [`SiteDefinition`].
pub type SiteSource = PageSource<ReqwestFetcher, ExtractionCascade>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDefinition {
    pub name: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub config: SourceConfig,
    #[serde(default)]
    pub profile: RecordProfile,
    #[serde(default)]
    pub strategies: Vec<StrategySpec>,
    #[serde(default)]
    pub fallback: Option<FallbackSpec>,
    /// Extra block-page markers on top of the built-in set.
    #[serde(default)]
    pub block_markers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SitesFile {
    sites: Vec<SiteDefinition>,
}

impl SiteDefinition {
    /// Structural checks that do not need to compile anything.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::ConfigError("site name is empty".to_string()));
        }
        if self.urls.is_empty() {
            return Err(AppError::ConfigError(format!(
                "site '{}' has no URLs",
                self.name
            )));
        }
        for url in &self.urls {
            let parsed = Url::parse(url).map_err(|e| {
                AppError::ConfigError(format!("site '{}': invalid URL '{url}': {e}", self.name))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::ConfigError(format!(
                    "site '{}': URL '{url}' must be http or https",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Build the HTTP client, the cascade and the source for this site.
    pub fn build_source(&self, metrics: Arc<dyn MetricsSink>) -> Result<SiteSource, AppError> {
        self.validate()?;

        let mut profile = self.profile.clone();
        if profile.source.is_empty() {
            profile.source = self.name.clone();
        }

        let cascade = ExtractionCascade::new(profile, &self.strategies, self.fallback.as_ref())
            .map_err(|e| AppError::ConfigError(format!("site '{}': {e}", self.name)))?;
        let fetcher = ReqwestFetcher::from_config(&self.config)?;

        tracing::debug!(
            site = %self.name,
            urls = self.urls.len(),
            strategies = self.strategies.len(),
            fallback = self.fallback.is_some(),
            "Built source"
        );

        Ok(PageSource::new(
            self.name.clone(),
            self.urls.clone(),
            fetcher,
            cascade,
            &self.config,
        )
        .with_detector(AntiBotDetector::default().with_markers(&self.block_markers))
        .with_metrics(metrics))
    }
}

/// Parse a sites document. Site names must be unique.
pub fn parse_sites(json: &str) -> Result<Vec<SiteDefinition>, AppError> {
    let file: SitesFile = serde_json::from_str(json)
        .map_err(|e| AppError::ConfigError(format!("invalid sites file: {e}")))?;

    let mut names = HashSet::new();
    for site in &file.sites {
        site.validate()?;
        if !names.insert(site.name.as_str()) {
            return Err(AppError::ConfigError(format!(
                "duplicate site name '{}'",
                site.name
            )));
        }
    }
    Ok(file.sites)
}

pub fn load_sites(path: &Path) -> Result<Vec<SiteDefinition>, AppError> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigError(format!("cannot read sites file {}: {e}", path.display()))
    })?;
    parse_sites(&json)
}
