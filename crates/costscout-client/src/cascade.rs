//! Declarative CSS extraction with an ordered strategy cascade.
//!
//! Strategies are tried in order and the first one that yields a usable
//! record wins; their results are never merged. When none matches, a generic
//! link-and-currency fallback runs once, at a confidence below every
//! strategy.

use std::collections::HashSet;

use costscout_core::error::AppError;
use costscout_core::models::{FetchedPage, Record};
use costscout_core::traits::PageExtractor;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::price::{ParsedPrice, find_currency_price, parse_price};

pub const DEFAULT_FALLBACK_CONFIDENCE: f64 = 0.4;
pub const DEFAULT_FALLBACK_DEPTH: usize = 4;

/// Site-wide values stamped onto every extracted record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordProfile {
    /// Source name; filled in from the site definition when empty.
    pub source: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub location: String,
    pub unit: String,
    /// ISO code used when the price text carries no currency.
    pub currency: Option<String>,
    pub tags: Vec<String>,
}

/// CSS selectors for the fields of one item, relative to the item element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSelectors {
    pub name: String,
    pub price: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    /// Element whose `href` is the item's detail page.
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub price_min: Option<String>,
    #[serde(default)]
    pub price_max: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    /// Selector for one item card / row.
    pub item: String,
    pub fields: FieldSelectors,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackSpec {
    /// Regex matched against resolved link URLs to find detail pages.
    pub detail_pattern: String,
    #[serde(default = "default_fallback_confidence")]
    pub confidence: f64,
    /// How many ancestors above a link to search for a price.
    #[serde(default = "default_fallback_depth")]
    pub max_depth: usize,
}

fn default_fallback_confidence() -> f64 {
    DEFAULT_FALLBACK_CONFIDENCE
}

fn default_fallback_depth() -> usize {
    DEFAULT_FALLBACK_DEPTH
}

struct CompiledFields {
    name: Selector,
    price: Selector,
    location: Option<Selector>,
    unit: Option<Selector>,
    link: Option<Selector>,
    price_min: Option<Selector>,
    price_max: Option<Selector>,
}

struct CompiledStrategy {
    name: String,
    item: Selector,
    fields: CompiledFields,
    confidence: f64,
}

struct Fallback {
    detail: Regex,
    confidence: f64,
    max_depth: usize,
    anchors: Selector,
}

pub struct ExtractionCascade {
    strategies: Vec<CompiledStrategy>,
    fallback: Option<Fallback>,
    profile: RecordProfile,
}

fn selector(strategy: &str, field: &str, css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| {
        AppError::ConfigError(format!(
            "strategy '{strategy}': invalid {field} selector '{css}': {e}"
        ))
    })
}

fn optional(strategy: &str, field: &str, css: Option<&str>) -> Result<Option<Selector>, AppError> {
    css.map(|css| selector(strategy, field, css)).transpose()
}

fn check_confidence(what: &str, confidence: f64) -> Result<(), AppError> {
    if confidence > 0.0 && confidence <= 1.0 {
        Ok(())
    } else {
        Err(AppError::ConfigError(format!(
            "{what}: confidence {confidence} outside (0, 1]"
        )))
    }
}

impl CompiledStrategy {
    fn compile(spec: &StrategySpec) -> Result<Self, AppError> {
        let n = spec.name.as_str();
        check_confidence(&format!("strategy '{n}'"), spec.confidence)?;
        let f = &spec.fields;
        Ok(Self {
            name: spec.name.clone(),
            item: selector(n, "item", &spec.item)?,
            fields: CompiledFields {
                name: selector(n, "name", &f.name)?,
                price: selector(n, "price", &f.price)?,
                location: optional(n, "location", f.location.as_deref())?,
                unit: optional(n, "unit", f.unit.as_deref())?,
                link: optional(n, "link", f.link.as_deref())?,
                price_min: optional(n, "price_min", f.price_min.as_deref())?,
                price_max: optional(n, "price_max", f.price_max.as_deref())?,
            },
            confidence: spec.confidence,
        })
    }
}

impl ExtractionCascade {
    /// Compile the strategies and the fallback.
    ///
    /// Fails on an invalid selector or pattern, a confidence outside (0, 1],
    /// or a fallback confidence that is not strictly below every strategy's.
    pub fn new(
        profile: RecordProfile,
        strategies: &[StrategySpec],
        fallback: Option<&FallbackSpec>,
    ) -> Result<Self, AppError> {
        let strategies = strategies
            .iter()
            .map(CompiledStrategy::compile)
            .collect::<Result<Vec<_>, _>>()?;

        let fallback = match fallback {
            Some(spec) => {
                check_confidence("fallback", spec.confidence)?;
                if let Some(lowest) = strategies.iter().map(|s| s.confidence).reduce(f64::min)
                    && spec.confidence >= lowest
                {
                    return Err(AppError::ConfigError(format!(
                        "fallback confidence {} must be below every strategy confidence (lowest {lowest})",
                        spec.confidence
                    )));
                }
                let detail = Regex::new(&spec.detail_pattern).map_err(|e| {
                    AppError::ConfigError(format!(
                        "invalid detail pattern '{}': {e}",
                        spec.detail_pattern
                    ))
                })?;
                Some(Fallback {
                    detail,
                    confidence: spec.confidence,
                    max_depth: spec.max_depth.max(1),
                    anchors: selector("fallback", "anchor", "a[href]")?,
                })
            }
            None => None,
        };

        if strategies.is_empty() && fallback.is_none() {
            return Err(AppError::ConfigError(
                "cascade needs at least one strategy or a fallback".to_string(),
            ));
        }

        Ok(Self {
            strategies,
            fallback,
            profile,
        })
    }

    pub fn profile(&self) -> &RecordProfile {
        &self.profile
    }

    fn record(&self, name: String, parsed: ParsedPrice, url: String, confidence: f64) -> Record {
        let p = &self.profile;
        let mut record = Record::new(&p.source, &p.category, name, parsed.price);
        record.subcategory = p.subcategory.clone();
        record.price_min = parsed.min;
        record.price_max = parsed.max;
        if let Some(currency) = parsed.currency.or_else(|| p.currency.clone()) {
            record.currency = currency;
        }
        record.location = p.location.clone();
        record.unit = p.unit.clone();
        record.source_url = url;
        record.confidence = confidence;
        record.tags = p.tags.clone();
        record
    }

    fn run_strategy(
        &self,
        strategy: &CompiledStrategy,
        doc: &Html,
        base: Option<&Url>,
        page_url: &str,
    ) -> Vec<Record> {
        let f = &strategy.fields;
        let mut records = Vec::new();

        for item in doc.select(&strategy.item) {
            let Some(name) = first_text(item, &f.name) else {
                continue;
            };
            let Some(parsed) = first_text(item, &f.price).and_then(|t| parse_price(&t)) else {
                continue;
            };

            let url = f
                .link
                .as_ref()
                .and_then(|sel| item.select(sel).next())
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| resolve(base, href))
                .unwrap_or_else(|| page_url.to_string());

            let mut record = self.record(name, parsed, url, strategy.confidence);
            if let Some(location) = f.location.as_ref().and_then(|s| first_text(item, s)) {
                record.location = location;
            }
            if let Some(unit) = f.unit.as_ref().and_then(|s| first_text(item, s)) {
                record.unit = unit;
            }
            if let Some(min) = amount(item, f.price_min.as_ref()) {
                record.price_min = Some(min);
            }
            if let Some(max) = amount(item, f.price_max.as_ref()) {
                record.price_max = Some(max);
            }
            record
                .attributes
                .insert("strategy".to_string(), strategy.name.clone());

            if record.is_extractable() {
                records.push(record);
            }
        }
        records
    }

    fn run_fallback(&self, fallback: &Fallback, doc: &Html, base: Option<&Url>) -> Vec<Record> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for anchor in doc.select(&fallback.anchors) {
            let Some(url) = anchor.value().attr("href").and_then(|h| resolve(base, h)) else {
                continue;
            };
            if !fallback.detail.is_match(&url) || seen.contains(&url) {
                continue;
            }

            let title = Some(collapse(anchor.text()))
                .filter(|t| !t.is_empty())
                .or_else(|| anchor.value().attr("title").map(|t| t.trim().to_string()))
                .filter(|t| !t.is_empty());
            let Some(title) = title else {
                continue;
            };

            let parsed = anchor
                .ancestors()
                .filter_map(ElementRef::wrap)
                .take(fallback.max_depth)
                .find_map(|el| find_currency_price(&collapse(el.text())));
            let Some(parsed) = parsed else {
                continue;
            };

            let mut record = self.record(title, parsed, url.clone(), fallback.confidence);
            record
                .attributes
                .insert("strategy".to_string(), "fallback".to_string());
            if record.is_extractable() {
                seen.insert(url);
                records.push(record);
            }
        }
        records
    }
}

impl PageExtractor for ExtractionCascade {
    fn extract(&self, page: &FetchedPage) -> Result<Vec<Record>, AppError> {
        if page.body.trim().is_empty() {
            return Err(AppError::ParseError(format!("empty document from {}", page.url)));
        }

        let doc = Html::parse_document(&page.body);
        let base = Url::parse(&page.url).ok();

        for strategy in &self.strategies {
            let records = self.run_strategy(strategy, &doc, base.as_ref(), &page.url);
            if !records.is_empty() {
                tracing::debug!(
                    url = %page.url,
                    strategy = %strategy.name,
                    records = records.len(),
                    "Strategy matched"
                );
                return Ok(records);
            }
        }

        let Some(fallback) = &self.fallback else {
            return Ok(Vec::new());
        };
        let records = self.run_fallback(fallback, &doc, base.as_ref());
        if !records.is_empty() {
            tracing::info!(
                url = %page.url,
                records = records.len(),
                "No strategy matched, used fallback"
            );
        }
        Ok(records)
    }
}

/// Whitespace-collapsed text of the first element matching `sel`, if non-empty.
fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .next()
        .map(|el| collapse(el.text()))
        .filter(|t| !t.is_empty())
}

fn amount(scope: ElementRef<'_>, sel: Option<&Selector>) -> Option<f64> {
    first_text(scope, sel?).and_then(|t| parse_price(&t)).map(|p| p.price)
}

fn collapse<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    match base {
        Some(base) => base.join(href).ok().map(String::from),
        None => Url::parse(href).ok().map(String::from),
    }
}
