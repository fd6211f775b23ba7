//! Detection of block pages and bot challenges.
//!
//! A blocked fetch is its own failure class: it means the site is resisting
//! us, which is different from the site being down (`BadStatus`) or our
//! selectors being stale (`EmptyResult`).

use crate::error::AppError;
use crate::models::FetchedPage;

/// Lower-case markers that identify challenge and firewall pages.
///
/// Bare vendor names are avoided: ordinary pages load scripts from
/// `cdnjs.cloudflare.com`, reCAPTCHA and bot-management CDNs.
pub const DEFAULT_BLOCK_MARKERS: &[&str] = &[
    // challenge / firewall vendors
    "attention required! | cloudflare",
    "cf-browser-verification",
    "cf-chl-",
    "checking your browser",
    "incapsula incident id",
    "request unsuccessful. incapsula",
    "px-captcha",
    "captcha-delivery.com",
    "distil_r_captcha",
    // generic wording
    "access denied",
    "complete the captcha",
    "solve the captcha",
    "suspicious activity",
    "unusual traffic",
    "are you a robot",
    "verify you are human",
    // request-id markers on block pages
    "incident id",
    "cloudflare ray id",
];

#[derive(Debug, Clone)]
pub struct AntiBotDetector {
    markers: Vec<String>,
}

impl Default for AntiBotDetector {
    fn default() -> Self {
        Self {
            markers: DEFAULT_BLOCK_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl AntiBotDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add site-specific markers on top of the defaults.
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.markers.extend(
            markers
                .into_iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty()),
        );
        self
    }

    /// First marker found in `text`, case-insensitively.
    pub fn matched_marker(&self, text: &str) -> Option<&str> {
        let haystack = text.to_lowercase();
        self.markers
            .iter()
            .find(|m| haystack.contains(m.as_str()))
            .map(String::as_str)
    }

    pub fn is_blocked(&self, text: &str) -> bool {
        self.matched_marker(text).is_some()
    }

    /// 403 and 429 are blocks regardless of the body.
    pub fn is_block_status(status: u16) -> bool {
        matches!(status, 403 | 429)
    }

    /// Classify a fetched page before any extraction runs.
    ///
    /// Only successful responses are inspected for markers; any other
    /// non-success status is a `BadStatus`.
    pub fn inspect(&self, page: &FetchedPage) -> Result<(), AppError> {
        if Self::is_block_status(page.status) {
            return Err(AppError::Blocked {
                url: page.url.clone(),
                reason: format!("HTTP {}", page.status),
            });
        }
        if !page.is_success() {
            return Err(AppError::BadStatus {
                url: page.url.clone(),
                status: page.status,
            });
        }
        if let Some(marker) = self.matched_marker(&page.body) {
            return Err(AppError::Blocked {
                url: page.url.clone(),
                reason: format!("page contains block marker '{marker}'"),
            });
        }
        Ok(())
    }
}
